//! Filter terms and the signature compiler.
//!
//! A query filter is a conjunctive list of [`Term`]s. Terms come from two
//! front doors that produce the same normalized output:
//!
//! - [`FilterBuilder`]: incremental, consumed on build (the programmatic
//!   path; type-safe wrappers compile down to this).
//! - [`parse_signature`]: the textual form:
//!
//! ```text
//! [in] Position, [out] Velocity, ?Mass, !Frozen, (ChildOf, *), Health(parent)
//! ```
//!
//! ## Grammar
//! - Terms are comma-separated; `||` joins adjacent terms into an Or group.
//! - `[in]`, `[out]`, `[inout]`, `[none]` prefix a term's access mode
//!   (default `inout`).
//! - `!Id` negates, `?Id` makes optional, `*` is the wildcard.
//! - `(R, O)` is a pair; `ChildOf`/`InstanceOf` as the relation produce the
//!   corresponding flagged id instead of a pair.
//! - `Id(src)` annotates the term source: `self`, `parent`, or an entity
//!   name. `ChildOf(X)`/`InstanceOf(X)` are relation shorthand, and
//!   `Id(*)` is shorthand for the pair `(Id, *)`.
//!
//! ## Normalization
//! Output terms preserve input order; defaults are resolved
//! (`inout = InOut`, `source = This`, `oper = And`; negated terms get
//! `inout = None`); Or runs are contiguous, and at least one member of each
//! group must match at query time.

use crate::engine::error::FilterError;
use crate::engine::registry::ComponentRegistry;
use crate::engine::types::{pair, EntityId, CHILDOF, INSTANCEOF, WILDCARD};

/// Declared access mode of a term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InOut {
    /// Read and write (the default).
    InOut,
    /// Read-only.
    In,
    /// Write-only.
    Out,
    /// No data access (presence check only).
    None,
}

/// Logical operator of a term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermOper {
    /// The archetype must match this term.
    And,
    /// At least one term of the contiguous Or group must match.
    Or,
    /// The archetype must not contain this id.
    Not,
    /// Does not constrain matching; data is exposed when present.
    Optional,
}

/// Entity against which a term's id is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermSource {
    /// The entities being iterated (the default).
    This,
    /// The iterated entity's `CHILDOF` target.
    Parent,
    /// A fixed entity.
    Entity(EntityId),
}

/// One clause of a query filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Term {
    /// Component id or pattern to match.
    pub id: EntityId,
    /// Entity the id is resolved against.
    pub source: TermSource,
    /// Logical operator.
    pub oper: TermOper,
    /// Declared access mode.
    pub inout: InOut,
}

impl Term {
    /// A default And/This/InOut term for `id`.
    pub fn new(id: EntityId) -> Self {
        Self { id, source: TermSource::This, oper: TermOper::And, inout: InOut::InOut }
    }
}

/// A normalized, immutable term list.
#[derive(Clone, Debug)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    /// Normalizes and validates a term list.
    ///
    /// ## Errors
    /// `FilterError::Empty` when no terms were provided.
    pub fn new(mut terms: Vec<Term>) -> Result<Self, FilterError> {
        if terms.is_empty() {
            return Err(FilterError::Empty);
        }
        for term in &mut terms {
            if term.oper == TermOper::Not {
                term.inout = InOut::None;
            }
        }
        Ok(Self { terms })
    }

    /// The normalized terms, in input order.
    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }
}

/// Incremental filter construction, consumed on build.
///
/// Access and source modifiers apply to the most recently added term, so
/// chains read left to right:
///
/// ```ignore
/// let filter = FilterBuilder::new()
///     .with(position).read()
///     .with(velocity).write()
///     .without(frozen)
///     .build()?;
/// ```
#[derive(Default)]
pub struct FilterBuilder {
    terms: Vec<Term>,
}

impl FilterBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, mut term: Term, oper: TermOper) -> Self {
        term.oper = oper;
        self.terms.push(term);
        self
    }

    /// Adds a required (And) term.
    pub fn with(self, id: EntityId) -> Self {
        self.push(Term::new(id), TermOper::And)
    }

    /// Adds a negated term.
    pub fn without(self, id: EntityId) -> Self {
        self.push(Term::new(id), TermOper::Not)
    }

    /// Adds an optional term.
    pub fn optional(self, id: EntityId) -> Self {
        self.push(Term::new(id), TermOper::Optional)
    }

    /// Adds a term to the current Or group, converting the preceding And
    /// term into the group head if necessary.
    pub fn or_with(mut self, id: EntityId) -> Self {
        if let Some(last) = self.terms.last_mut() {
            if last.oper == TermOper::And {
                last.oper = TermOper::Or;
            }
        }
        self.push(Term::new(id), TermOper::Or)
    }

    /// Marks the last term read-only.
    pub fn read(self) -> Self {
        self.access(InOut::In)
    }

    /// Marks the last term write-only.
    pub fn write(self) -> Self {
        self.access(InOut::Out)
    }

    /// Sets the last term's access mode.
    pub fn access(mut self, inout: InOut) -> Self {
        if let Some(last) = self.terms.last_mut() {
            last.inout = inout;
        }
        self
    }

    /// Sets the last term's source.
    pub fn source(mut self, source: TermSource) -> Self {
        if let Some(last) = self.terms.last_mut() {
            last.source = source;
        }
        self
    }

    /// Normalizes into a [`Filter`].
    pub fn build(self) -> Result<Filter, FilterError> {
        Filter::new(self.terms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signature parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    registry: &'a ComponentRegistry,
}

#[derive(Clone, Copy)]
enum Ident {
    ChildOf,
    InstanceOf,
    Wildcard,
    Id(EntityId),
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> FilterError {
        let found = self.input[self.pos..].chars().take(8).collect::<String>();
        let found = if found.is_empty() { "end of input".to_string() } else { found };
        FilterError::Unexpected { found, at: self.pos, expected }
    }

    fn ident(&mut self) -> Result<(&'a str, usize), FilterError> {
        self.skip_ws();
        let start = self.pos;
        let input = self.input;
        let rest = &input[start..];
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_alphanumeric() && *c != '_')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.unexpected("an identifier"));
        }
        self.pos = start + end;
        Ok((&rest[..end], start))
    }

    fn resolve(&mut self) -> Result<Ident, FilterError> {
        self.skip_ws();
        if self.eat("*") {
            return Ok(Ident::Wildcard);
        }
        let (name, at) = self.ident()?;
        match name {
            "ChildOf" => Ok(Ident::ChildOf),
            "InstanceOf" => Ok(Ident::InstanceOf),
            _ => self
                .registry
                .lookup(name)
                .map(Ident::Id)
                .ok_or_else(|| FilterError::UnknownIdentifier { name: name.to_string(), at }),
        }
    }

    fn ident_to_id(&self, ident: Ident) -> EntityId {
        match ident {
            Ident::Wildcard => WILDCARD,
            Ident::ChildOf => CHILDOF | WILDCARD,
            Ident::InstanceOf => INSTANCEOF | WILDCARD,
            Ident::Id(id) => id,
        }
    }

    fn expect(&mut self, token: &str, expected: &'static str) -> Result<(), FilterError> {
        self.skip_ws();
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn pair_body(&mut self, relation: Ident) -> Result<EntityId, FilterError> {
        self.expect(",", "`,` inside a pair")?;
        let object = self.resolve()?;
        self.expect(")", "`)` closing the pair")?;
        let object_id = self.ident_to_id(object);
        Ok(match relation {
            Ident::ChildOf => CHILDOF | object_id,
            Ident::InstanceOf => INSTANCEOF | object_id,
            relation => pair(self.ident_to_id(relation), object_id),
        })
    }

    fn inout_annotation(&mut self) -> Result<Option<InOut>, FilterError> {
        self.skip_ws();
        if !self.eat("[") {
            return Ok(None);
        }
        let (name, at) = self.ident()?;
        let inout = match name {
            "in" => InOut::In,
            "out" => InOut::Out,
            "inout" => InOut::InOut,
            "none" => InOut::None,
            _ => {
                return Err(FilterError::Unexpected {
                    found: name.to_string(),
                    at,
                    expected: "one of `in`, `out`, `inout`, `none`",
                })
            }
        };
        self.expect("]", "`]` closing the access annotation")?;
        Ok(Some(inout))
    }

    fn term(&mut self) -> Result<Term, FilterError> {
        let inout = self.inout_annotation()?;

        self.skip_ws();
        let oper = if self.eat("!") {
            TermOper::Not
        } else if self.eat("?") {
            TermOper::Optional
        } else {
            TermOper::And
        };

        self.skip_ws();
        let mut term = if self.eat("(") {
            let relation = self.resolve()?;
            Term::new(self.pair_body(relation)?)
        } else {
            let ident = self.resolve()?;
            let mut term = Term::new(self.ident_to_id(ident));
            self.skip_ws();
            if self.eat("(") {
                term = self.call_argument(ident_owner(ident), term)?;
            }
            term
        };

        term.oper = oper;
        if let Some(inout) = inout {
            term.inout = inout;
        }
        Ok(term)
    }

    /// Resolves the `Name(arg)` form: relation shorthand for
    /// `ChildOf`/`InstanceOf`, pair shorthand for `Name(*)`, and a source
    /// annotation otherwise.
    fn call_argument(&mut self, owner: Owner, mut term: Term) -> Result<Term, FilterError> {
        self.skip_ws();
        match owner {
            Owner::ChildOf | Owner::InstanceOf => {
                let object = self.resolve()?;
                let object_id = self.ident_to_id(object);
                term.id = match owner {
                    Owner::ChildOf => CHILDOF | object_id,
                    _ => INSTANCEOF | object_id,
                };
            }
            Owner::Plain(relation) => {
                if self.eat("*") {
                    term.id = pair(relation, WILDCARD);
                } else {
                    let (name, at) = self.ident()?;
                    term.source = match name {
                        "self" => TermSource::This,
                        "parent" => TermSource::Parent,
                        _ => TermSource::Entity(self.registry.lookup(name).ok_or_else(
                            || FilterError::UnknownIdentifier { name: name.to_string(), at },
                        )?),
                    };
                }
            }
            Owner::Wildcard => {
                return Err(self.unexpected("no argument after `*`"));
            }
        }
        self.expect(")", "`)` closing the argument")?;
        Ok(term)
    }
}

enum Owner {
    ChildOf,
    InstanceOf,
    Wildcard,
    Plain(EntityId),
}

fn ident_owner(ident: Ident) -> Owner {
    match ident {
        Ident::ChildOf => Owner::ChildOf,
        Ident::InstanceOf => Owner::InstanceOf,
        Ident::Wildcard => Owner::Wildcard,
        Ident::Id(id) => Owner::Plain(id),
    }
}

/// Compiles a textual signature into a normalized term list.
///
/// Names resolve against the registry's registration names; see the module
/// docs for the grammar.
pub fn parse_signature(
    input: &str,
    registry: &ComponentRegistry,
) -> Result<Filter, FilterError> {
    let mut parser = Parser { input, pos: 0, registry };
    let mut terms: Vec<Term> = Vec::new();

    parser.skip_ws();
    if parser.peek().is_none() {
        return Err(FilterError::Empty);
    }

    let mut pending_or = false;
    loop {
        let mut term = parser.term()?;
        if pending_or {
            if term.oper != TermOper::And {
                return Err(FilterError::Unexpected {
                    found: "modifier".to_string(),
                    at: parser.pos,
                    expected: "plain terms on both sides of `||`",
                });
            }
            term.oper = TermOper::Or;
        }
        terms.push(term);
        parser.skip_ws();

        if parser.peek().is_none() {
            break;
        }
        if parser.eat("||") {
            let at = parser.pos;
            let last = terms.last_mut().expect("just pushed");
            if !matches!(last.oper, TermOper::And | TermOper::Or) {
                return Err(FilterError::Unexpected {
                    found: "||".to_string(),
                    at,
                    expected: "plain terms on both sides of `||`",
                });
            }
            last.oper = TermOper::Or;
            pending_or = true;
            parser.skip_ws();
            if parser.peek().is_none() {
                return Err(FilterError::DanglingOr { at });
            }
        } else if parser.eat(",") {
            pending_or = false;
        } else {
            return Err(parser.unexpected("`,` or `||` between terms"));
        }
    }

    Filter::new(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::ComponentDescriptor;
    use crate::engine::types::make_entity;

    fn registry() -> (ComponentRegistry, EntityId, EntityId, EntityId) {
        let mut registry = ComponentRegistry::new();
        let position = make_entity(1, 0);
        let velocity = make_entity(2, 0);
        let frozen = make_entity(3, 0);
        registry.insert(ComponentDescriptor::of::<u64>("Position").with_id(position));
        registry.insert(ComponentDescriptor::of::<u64>("Velocity").with_id(velocity));
        registry.insert(ComponentDescriptor::tag("Frozen").with_id(frozen));
        (registry, position, velocity, frozen)
    }

    #[test]
    fn parses_annotations_modifiers_and_defaults() {
        let (registry, position, velocity, frozen) = registry();
        let filter =
            parse_signature("[in] Position, ?Velocity, !Frozen", &registry).unwrap();
        let terms = filter.terms();
        assert_eq!(terms.len(), 3);

        assert_eq!(terms[0].id, position);
        assert_eq!(terms[0].inout, InOut::In);
        assert_eq!(terms[0].oper, TermOper::And);
        assert_eq!(terms[0].source, TermSource::This);

        assert_eq!(terms[1].id, velocity);
        assert_eq!(terms[1].oper, TermOper::Optional);
        assert_eq!(terms[1].inout, InOut::InOut);

        assert_eq!(terms[2].id, frozen);
        assert_eq!(terms[2].oper, TermOper::Not);
        assert_eq!(terms[2].inout, InOut::None);
    }

    #[test]
    fn parses_pairs_and_relation_shorthand() {
        let (registry, position, ..) = registry();
        let filter =
            parse_signature("(Position, *), ChildOf(*), InstanceOf(Position)", &registry)
                .unwrap();
        let terms = filter.terms();
        assert_eq!(terms[0].id, pair(position, WILDCARD));
        assert_eq!(terms[1].id, CHILDOF | WILDCARD);
        assert_eq!(terms[2].id, INSTANCEOF | position);
    }

    #[test]
    fn parses_or_groups_contiguously() {
        let (registry, ..) = registry();
        let filter = parse_signature("Position || Velocity, Frozen", &registry).unwrap();
        let terms = filter.terms();
        assert_eq!(terms[0].oper, TermOper::Or);
        assert_eq!(terms[1].oper, TermOper::Or);
        assert_eq!(terms[2].oper, TermOper::And);
    }

    #[test]
    fn parses_source_annotations() {
        let (registry, position, ..) = registry();
        let filter = parse_signature("Position(parent), Velocity(self)", &registry).unwrap();
        assert_eq!(filter.terms()[0].id, position);
        assert_eq!(filter.terms()[0].source, TermSource::Parent);
        assert_eq!(filter.terms()[1].source, TermSource::This);
    }

    #[test]
    fn rejects_unknown_names_and_empty_input() {
        let (registry, ..) = registry();
        assert!(matches!(
            parse_signature("Nonsense", &registry),
            Err(FilterError::UnknownIdentifier { .. })
        ));
        assert!(matches!(parse_signature("  ", &registry), Err(FilterError::Empty)));
        assert!(matches!(
            parse_signature("Position ||", &registry),
            Err(FilterError::DanglingOr { .. })
        ));
    }

    #[test]
    fn builder_matches_parser_output() {
        let (registry, position, velocity, frozen) = registry();
        let parsed = parse_signature("[in] Position, Velocity, !Frozen", &registry).unwrap();
        let built = FilterBuilder::new()
            .with(position)
            .read()
            .with(velocity)
            .without(frozen)
            .build()
            .unwrap();
        assert_eq!(parsed.terms(), built.terms());
    }
}

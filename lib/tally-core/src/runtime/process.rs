use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
};

use tracing::{info_span, Span};

use crate::config::ConstructionError;

static NEXT_UNIT_ID: AtomicUsize = AtomicUsize::new(0);

/// Unit identifier.
///
/// Unique for the lifetime of the process, and only used to tell units apart in logs: two units may share a name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl UnitId {
    fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Relaxed))
    }

    /// Returns the identifier as a plain integer.
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a unit: its identifier, its sanitized name, and the span its body runs in.
#[derive(Clone)]
pub(super) struct UnitIdentity {
    id: UnitId,
    name: Arc<str>,
    span: Span,
}

impl UnitIdentity {
    pub fn new(name: &str) -> Result<Self, ConstructionError> {
        let sanitized = sanitize_name(name);
        if sanitized.is_empty() {
            return Err(ConstructionError::InvalidName { name: name.to_string() });
        }

        let id = UnitId::next();
        let span = info_span!("unit", unit_id = id.as_usize(), unit_name = &*sanitized);

        Ok(Self {
            id,
            name: sanitized.into(),
            span,
        })
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Restricts a name to alphanumerics and single underscores, with no leading or trailing underscore.
///
/// `sum aggregator` and `--sum-aggregator--` both become `sum_aggregator`.
fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !sanitized.is_empty() {
                sanitized.push('_');
            }
            pending_separator = false;
            sanitized.push(c);
        } else {
            pending_separator = true;
        }
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized() {
        let cases = [
            ("aggregator", "aggregator"),
            ("counter_7", "counter_7"),
            ("sum aggregator", "sum_aggregator"),
            ("--sum-aggregator--", "sum_aggregator"),
            ("counter===7", "counter_7"),
            ("pool.counter", "pool_counter"),
            ("_", ""),
            ("", ""),
        ];

        for (input, expected) in cases {
            assert_eq!(sanitize_name(input), expected, "input: {:?}", input);
        }
    }

    #[test]
    fn empty_names_are_rejected() {
        for name in ["", "   ", "---"] {
            assert!(matches!(
                UnitIdentity::new(name),
                Err(ConstructionError::InvalidName { name: rejected }) if rejected == name
            ));
        }
    }

    #[test]
    fn identifiers_are_unique() {
        let first = UnitIdentity::new("counter").unwrap();
        let second = UnitIdentity::new("counter").unwrap();

        assert_eq!(first.name(), second.name());
        assert_ne!(first.id(), second.id());
    }
}

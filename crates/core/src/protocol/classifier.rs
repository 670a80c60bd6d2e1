//! Marker classifier
//!
//! Decides which marker role a single raw line plays. Pure and total:
//! every line maps to exactly one [`ClassifiedLine`], malformed marker
//! text falls through to [`ClassifiedLine::PlainContent`].

use regex::Regex;
use std::sync::LazyLock;

use super::{ASSISTANT_TOKEN, MarkerSet, Role, USER_TOKEN};

/// A line made only of four or more `x`/`X` characters
static X_TERMINATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[xX]{4,}$").expect("valid terminator pattern"));

/// Classification result for one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedLine {
    /// Hard terminator, stops backward traversal
    Terminate,
    /// Dash separator, closes the block being collected
    SeparatorBoundary,
    /// Line is exactly `===`
    UserBlockBoundary,
    /// Line is exactly `= =`
    AssistantBlockBoundary,
    /// Single-line user turn
    UserInline(String),
    /// Single-line assistant turn
    AssistantInline(String),
    /// Anything else, carried verbatim
    PlainContent(String),
}

impl ClassifiedLine {
    /// Role carried by boundary and inline variants
    pub fn role(&self) -> Option<Role> {
        match self {
            ClassifiedLine::UserBlockBoundary | ClassifiedLine::UserInline(_) => Some(Role::User),
            ClassifiedLine::AssistantBlockBoundary | ClassifiedLine::AssistantInline(_) => {
                Some(Role::Assistant)
            }
            _ => None,
        }
    }

    /// Whether this line is protocol structure rather than content
    pub fn is_marker(&self) -> bool {
        !matches!(self, ClassifiedLine::PlainContent(_))
    }

    /// Short label, used by diagnostics output
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedLine::Terminate => "terminate",
            ClassifiedLine::SeparatorBoundary => "separator",
            ClassifiedLine::UserBlockBoundary => "user-boundary",
            ClassifiedLine::AssistantBlockBoundary => "assistant-boundary",
            ClassifiedLine::UserInline(_) => "user-inline",
            ClassifiedLine::AssistantInline(_) => "assistant-inline",
            ClassifiedLine::PlainContent(_) => "plain",
        }
    }

    pub(crate) fn inline(role: Role, payload: &str) -> Self {
        match role {
            Role::User => ClassifiedLine::UserInline(payload.to_string()),
            Role::Assistant => ClassifiedLine::AssistantInline(payload.to_string()),
        }
    }
}

impl MarkerSet {
    /// Classify a line against this marker set
    pub fn classify(&self, line: &str) -> ClassifiedLine {
        classify(line, self)
    }

    fn is_terminator(&self, trimmed: &str) -> bool {
        (!self.terminator.is_empty() && trimmed == self.terminator)
            || X_TERMINATOR_RE.is_match(trimmed)
    }
}

/// Classify one raw line.
///
/// Rules apply in priority order, first match wins:
/// terminator, separator, exact `===`, exact `= =`, wrapped
/// `===payload===` form, `===` prefix, `= =` prefix, plain content.
pub fn classify(line: &str, markers: &MarkerSet) -> ClassifiedLine {
    let trimmed = line.trim();

    if markers.is_terminator(trimmed) {
        return ClassifiedLine::Terminate;
    }
    if markers.is_separator(trimmed) {
        return ClassifiedLine::SeparatorBoundary;
    }
    if trimmed == USER_TOKEN {
        return ClassifiedLine::UserBlockBoundary;
    }
    if trimmed == ASSISTANT_TOKEN {
        return ClassifiedLine::AssistantBlockBoundary;
    }

    // Legacy wrapped form ranks above the prefix-only rule
    for role in [Role::User, Role::Assistant] {
        if let Some(payload) = wrapped_payload(trimmed, role.token()) {
            return ClassifiedLine::inline(role, payload);
        }
    }

    for role in [Role::User, Role::Assistant] {
        if let Some(rest) = trimmed.strip_prefix(role.token()) {
            let payload = rest.trim();
            if !payload.is_empty() {
                return ClassifiedLine::inline(role, payload);
            }
        }
    }

    ClassifiedLine::PlainContent(line.to_string())
}

fn wrapped_payload<'a>(trimmed: &'a str, token: &str) -> Option<&'a str> {
    if trimmed.len() <= token.len() * 2 {
        return None;
    }
    let inner = trimmed.strip_prefix(token)?.strip_suffix(token)?.trim();
    (!inner.is_empty()).then_some(inner)
}

/// Segment classification for file-derived route patterns
///
/// Route files name their dynamic segments with a sigil:
///
/// - `$slug` → named parameter `:slug`
/// - `$rest*` → zero-or-more wildcard `*rest`
/// - anything else → static text
///
/// The same segment type is recovered from a compiled pattern
/// (`:slug`, `*rest`) by [`parse_pattern_segment`].

/// Prefix marking a dynamic file segment
pub const PARAM_SIGIL: char = '$';

/// Suffix turning a dynamic file segment into a wildcard
pub const WILDCARD_SIGIL: char = '*';

/// One segment of a route pattern
///
/// # Examples
///
/// ```
/// use tessera_router::route::pattern::{classify_segment, PatternSegmentType};
///
/// assert!(matches!(classify_segment("about"), PatternSegmentType::Static(_)));
/// assert!(matches!(classify_segment("$slug"), PatternSegmentType::Param(_)));
/// assert!(matches!(classify_segment("$path*"), PatternSegmentType::Wildcard(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegmentType {
    /// Literal text that must match exactly
    Static(String),
    /// Named parameter binding exactly one URL segment
    Param(String),
    /// Named wildcard binding zero or more trailing URL segments
    Wildcard(String),
}

impl PatternSegmentType {
    /// Renders the segment in compiled pattern syntax
    pub fn to_pattern(&self) -> String {
        match self {
            PatternSegmentType::Static(text) => text.clone(),
            PatternSegmentType::Param(name) => format!(":{}", name),
            PatternSegmentType::Wildcard(name) => format!("*{}", name),
        }
    }

    /// Matching precedence: static before parameter before wildcard
    pub fn rank(&self) -> u8 {
        match self {
            PatternSegmentType::Static(_) => 0,
            PatternSegmentType::Param(_) => 1,
            PatternSegmentType::Wildcard(_) => 2,
        }
    }

    /// Parameter name bound by this segment, if any
    pub fn param_name(&self) -> Option<&str> {
        match self {
            PatternSegmentType::Static(_) => None,
            PatternSegmentType::Param(name) | PatternSegmentType::Wildcard(name) => Some(name),
        }
    }
}

/// Classifies a file-name segment (pure function)
///
/// A bare sigil (`$` or `$*`) has no name and stays static.
pub fn classify_segment(segment: &str) -> PatternSegmentType {
    match segment.strip_prefix(PARAM_SIGIL) {
        Some(rest) => match rest.strip_suffix(WILDCARD_SIGIL) {
            Some(name) if !name.is_empty() => PatternSegmentType::Wildcard(name.to_string()),
            Some(_) => PatternSegmentType::Static(segment.to_string()),
            None if !rest.is_empty() => PatternSegmentType::Param(rest.to_string()),
            None => PatternSegmentType::Static(segment.to_string()),
        },
        None => PatternSegmentType::Static(segment.to_string()),
    }
}

/// Parses a segment of an already-compiled pattern (`:id`, `*rest`, `about`)
pub fn parse_pattern_segment(segment: &str) -> PatternSegmentType {
    if let Some(name) = segment.strip_prefix(':').filter(|n| !n.is_empty()) {
        return PatternSegmentType::Param(name.to_string());
    }
    if let Some(name) = segment.strip_prefix('*').filter(|n| !n.is_empty()) {
        return PatternSegmentType::Wildcard(name.to_string());
    }
    PatternSegmentType::Static(segment.to_string())
}

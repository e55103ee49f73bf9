/// Route pattern handling
///
/// - `pattern` - segment classification
/// - `parser` - file path → pattern, specificity ordering
/// - `matcher` - pattern × URL → parameters
pub mod matcher;
pub mod parser;
pub mod pattern;

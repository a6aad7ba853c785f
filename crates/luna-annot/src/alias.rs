//! Parsing of the user-editable alias remap table: one rule per line,
//! `canonical|original1|original2|...`, applied to
//! [`luna_core::annot::AnnotationSet::add_alias`].

use luna_core::annot::AnnotationSet;
use luna_core::error::LunaError;

/// Apply every alias rule in `table_text` to `set`.
///
/// Blank lines and lines starting with `%` or `#` are ignored. Each
/// remaining line is `canonical|original1|original2|...`; every original
/// on the line aliases to the same canonical name.
///
/// # Errors
/// Propagates [`luna_core::annot::AnnotationSet::add_alias`]'s rejection of
/// conflicting or circular remaps.
pub fn apply_alias_table(
    set: &mut AnnotationSet,
    table_text: &str,
    present_originals: &[String],
) -> Result<(), LunaError> {
    for line in table_text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split('|').map(str::trim);
        let Some(canonical) = parts.next() else {
            continue;
        };
        if canonical.is_empty() {
            continue;
        }
        for original in parts {
            if original.is_empty() {
                continue;
            }
            set.add_alias(canonical, original, present_originals)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_simple_rule() {
        let mut set = AnnotationSet::new();
        let present = vec!["Obstructive Apnea".to_string()];
        apply_alias_table(&mut set, "apnea_obstructive|Obstructive Apnea", &present).unwrap();
        assert_eq!(set.resolve_alias("Obstructive Apnea"), "apnea_obstructive");
    }

    #[test]
    fn ignores_comments_and_blanks() {
        let mut set = AnnotationSet::new();
        apply_alias_table(&mut set, "% a comment\n\n# also a comment\n", &[]).unwrap();
        assert_eq!(set.resolve_alias("anything"), "anything");
    }
}

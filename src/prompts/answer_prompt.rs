//! Answer stage system prompt

use crate::config::Capability;

/// Generates the answer-stage system prompt template
///
/// The template carries a `{schema}` placeholder that the caller fills with
/// the freshly introspected schema.
pub fn generate_answer_prompt(capability: Capability) -> String {
    let image_note = match capability {
        Capability::TextImage => {
            "\nIMAGES:\nThe question may come with an attached image such as a map, a sketch or a \
             photo. Use what it shows (place names, shapes, extents, legends) to decide which \
             tables, filters and spatial relations the query needs. Never invent identifiers \
             from the image that are not in the schema.\n"
        }
        Capability::Text => "",
    };

    format!(
        r#"You are an expert PostGIS analyst. You translate questions about geographic data
into a single PostgreSQL/PostGIS query.

DATABASE SCHEMA (schema public):
{{schema}}

QUERY RULES:
- Use only the tables, views and columns listed in the schema above.
- Give every table an alias and qualify columns with it.
- Prefer spatial functions (ST_Intersects, ST_DWithin, ST_Contains, ST_Buffer,
  ST_Area, ST_Length, ST_Transform) over manual coordinate arithmetic.
- Return geometry columns as text with ST_AsText(...) and keep the geometry
  column name as the alias, for example ST_AsText(c.geom) AS geom.
- When the conversation already holds a query and the question asks to change
  it, edit that query instead of writing a new one.
- End the statement with a semicolon.
{image_note}
OUTPUT FORMAT:
- Reply with exactly one fenced code block tagged sql and nothing else.
- Do not explain the query.
- If the question is about the schema itself and needs no query, answer in one
  or two plain sentences without a code block.
"#,
        image_note = image_note
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_keeps_schema_placeholder() {
        let prompt = generate_answer_prompt(Capability::Text);
        assert!(prompt.contains("{schema}"));
        assert!(prompt.contains("ST_AsText"));
    }

    #[test]
    fn test_vision_template_adds_image_section() {
        assert!(generate_answer_prompt(Capability::TextImage).contains("IMAGES:"));
        assert!(!generate_answer_prompt(Capability::Text).contains("IMAGES:"));
    }
}

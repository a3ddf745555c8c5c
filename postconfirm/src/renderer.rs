use std::collections::HashMap;

use postconfirm_milter::TemplateRenderer;

/// A minimal `{{variable}}` substitution renderer. The real mustache
/// engine is an external collaborator (§1); this default is enough to
/// run the challenge-email template end to end without one.
pub struct SimpleTemplateRenderer;

impl TemplateRenderer for SimpleTemplateRenderer {
    fn render(&self, template: &str, variables: &HashMap<String, String>) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            rest = &rest[start + 2..];
            let Some(end) = rest.find("}}") else {
                out.push_str("{{");
                out.push_str(rest);
                rest = "";
                break;
            };
            let key = rest[..end].trim();
            if let Some(value) = variables.get(key) {
                out.push_str(value);
            }
            rest = &rest[end + 2..];
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let mut vars = HashMap::new();
        vars.insert("id".to_owned(), "abc123".to_owned());
        let out = SimpleTemplateRenderer.render("ref: {{id}}", &vars);
        assert_eq!(out, "ref: abc123");
    }

    #[test]
    fn leaves_unknown_variables_blank() {
        let out = SimpleTemplateRenderer.render("x: {{missing}}", &HashMap::new());
        assert_eq!(out, "x: ");
    }
}

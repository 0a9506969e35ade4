use crate::types::{ElementDescriptor, LocatorCandidate, PriorityTier};

/// Render `value` as a path-expression string literal.
///
/// Values without an apostrophe are single-quoted. Anything else becomes a
/// `concat(...)` in which each apostrophe is the double-quoted literal `"'"`
/// and every other run is single-quoted, so the result parses whatever the
/// value contains.
pub fn escape_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }

    let mut pieces = Vec::new();
    let mut run = String::new();
    for c in value.chars() {
        if c == '\'' {
            if !run.is_empty() {
                pieces.push(format!("'{run}'"));
                run.clear();
            }
            pieces.push("\"'\"".to_string());
        } else {
            run.push(c);
        }
    }
    if !run.is_empty() {
        pieces.push(format!("'{run}'"));
    }

    match pieces.as_slice() {
        [single] => single.clone(),
        _ => format!("concat({})", pieces.join(", ")),
    }
}

/// Build the single locator for one descriptor. Pure.
///
/// Tiers, first usable wins: `id`, `href` (anchors only), `aria-label`,
/// visible text, then every remaining supported attribute joined by `and`.
pub fn synthesize(element_ref: usize, element: &ElementDescriptor) -> LocatorCandidate {
    let tag = node_test(&element.tag);
    let attrs = &element.attributes;
    let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let (path_expression, priority_tier) = if let Some(id) = present(&attrs.id) {
        (format!("//{tag}[@id={}]", escape_literal(&id)), PriorityTier::Id)
    } else if let Some(href) = present(&attrs.href).filter(|_| tag == "a") {
        (format!("//a[@href={}]", escape_literal(&href)), PriorityTier::Href)
    } else if let Some(label) = present(&attrs.aria_label) {
        (format!("//{tag}[@aria-label={}]", escape_literal(&label)), PriorityTier::AriaLabel)
    } else if let Some(text) = attrs.text.as_deref().and_then(first_line) {
        (
            format!("//{tag}[contains(normalize-space(.), {})]", escape_literal(&text)),
            PriorityTier::Text,
        )
    } else {
        let clauses: Vec<String> = [
            ("name", &attrs.name),
            ("placeholder", &attrs.placeholder),
            ("role", &attrs.role),
            ("title", &attrs.title),
            ("value", &attrs.value),
        ]
        .into_iter()
        .filter_map(|(attr, v)| present(v).map(|v| format!("@{attr}={}", escape_literal(&v))))
        .collect();
        let path = if clauses.is_empty() {
            format!("//{tag}")
        } else {
            format!("//{tag}[{}]", clauses.join(" and "))
        };
        (path, PriorityTier::Conjunction)
    };

    debug_assert!(
        crate::xpath::parse_locator(&path_expression).is_ok(),
        "synthesized an unparsable locator: {path_expression}"
    );
    LocatorCandidate {
        element_ref,
        path_expression,
        priority_tier,
    }
}

pub fn synthesize_all(elements: &[ElementDescriptor]) -> Vec<LocatorCandidate> {
    elements.iter().enumerate().map(|(i, e)| synthesize(i, e)).collect()
}

/// First non-empty line with runs of whitespace collapsed.
fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|l| !l.is_empty())
}

fn node_test(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    let valid = tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid { tag } else { "*".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attributes, Category};
    use crate::xpath;

    fn element(tag: &str, attributes: Attributes) -> ElementDescriptor {
        ElementDescriptor {
            tag: tag.to_string(),
            attributes,
            visible: true,
            category: Category::Other,
        }
    }

    #[test]
    fn escapes_plain_and_quoted_values() {
        assert_eq!(escape_literal("Search"), "'Search'");
        assert_eq!(escape_literal("it's"), "concat('it', \"'\", 's')");
        assert_eq!(escape_literal("'"), "\"'\"");
        assert_eq!(escape_literal("''x"), "concat(\"'\", \"'\", 'x')");
        assert_eq!(escape_literal("say \"hi\""), "'say \"hi\"'");
    }

    #[test]
    fn id_wins_over_everything() {
        let c = synthesize(
            0,
            &element(
                "input",
                Attributes {
                    id: Some("q".into()),
                    aria_label: Some("Search".into()),
                    text: Some("x".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(c.priority_tier, PriorityTier::Id);
        assert_eq!(c.path_expression, "//input[@id='q']");
    }

    #[test]
    fn href_only_applies_to_anchors() {
        let attrs = Attributes {
            href: Some("/docs".into()),
            text: Some("Docs".into()),
            ..Attributes::default()
        };
        let link = synthesize(0, &element("a", attrs.clone()));
        assert_eq!(link.priority_tier, PriorityTier::Href);
        assert_eq!(link.path_expression, "//a[@href='/docs']");

        let area = synthesize(1, &element("button", attrs));
        assert_eq!(area.priority_tier, PriorityTier::Text);
        assert_eq!(area.path_expression, "//button[contains(normalize-space(.), 'Docs')]");
    }

    #[test]
    fn aria_label_then_text_then_conjunction() {
        let labelled = synthesize(
            0,
            &element(
                "input",
                Attributes {
                    aria_label: Some("Search".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(labelled.path_expression, "//input[@aria-label='Search']");
        assert_eq!(labelled.priority_tier, PriorityTier::AriaLabel);

        let text = synthesize(
            0,
            &element(
                "button",
                Attributes {
                    text: Some("  Sign\n\n in  \nnow".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(text.path_expression, "//button[contains(normalize-space(.), 'Sign')]");

        let conj = synthesize(
            0,
            &element(
                "input",
                Attributes {
                    name: Some("email".into()),
                    placeholder: Some("you@example.com".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(conj.priority_tier, PriorityTier::Conjunction);
        assert_eq!(conj.path_expression, "//input[@name='email' and @placeholder='you@example.com']");
    }

    #[test]
    fn text_tier_compares_collapsed_whitespace() {
        let c = synthesize(
            0,
            &element(
                "a",
                Attributes {
                    text: Some("Read\t  more".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(c.path_expression, "//a[contains(normalize-space(.), 'Read more')]");
    }

    #[test]
    fn whitespace_only_values_are_unusable() {
        let c = synthesize(
            0,
            &element(
                "input",
                Attributes {
                    id: Some("   ".into()),
                    placeholder: Some("Name".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(c.path_expression, "//input[@placeholder='Name']");
    }

    #[test]
    fn strange_tags_fall_back_to_any_element() {
        let c = synthesize(
            0,
            &element(
                "svg:text",
                Attributes {
                    text: Some("Chart".into()),
                    ..Attributes::default()
                },
            ),
        );
        assert_eq!(c.path_expression, "//*[contains(normalize-space(.), 'Chart')]");
    }

    #[test]
    fn apostrophes_in_every_tier_still_parse() {
        let nasty = ["it's", "'", "''", "a'b'c", "O'Reilly \"Books\"", "'lead", "trail'"];
        for value in nasty {
            for attrs in [
                Attributes {
                    id: Some(value.into()),
                    ..Attributes::default()
                },
                Attributes {
                    href: Some(value.into()),
                    ..Attributes::default()
                },
                Attributes {
                    aria_label: Some(value.into()),
                    ..Attributes::default()
                },
                Attributes {
                    text: Some(value.into()),
                    ..Attributes::default()
                },
                Attributes {
                    name: Some(value.into()),
                    title: Some(value.into()),
                    ..Attributes::default()
                },
            ] {
                let c = synthesize(0, &element("a", attrs));
                assert!(xpath::parse_locator(&c.path_expression).is_ok(), "{}", c.path_expression);
            }
        }
    }

    #[test]
    fn element_refs_follow_input_order() {
        let elements = vec![
            element(
                "button",
                Attributes {
                    text: Some("One".into()),
                    ..Attributes::default()
                },
            ),
            element(
                "button",
                Attributes {
                    text: Some("Two".into()),
                    ..Attributes::default()
                },
            ),
        ];
        let refs: Vec<_> = synthesize_all(&elements).into_iter().map(|c| c.element_ref).collect();
        assert_eq!(refs, vec![0, 1]);
    }
}

use std::collections::BTreeMap;

use sxd_document::parser;
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::server::matchers::{
    definition::{ExpressionDefinition, PatternDefinition},
    Error, MatchResult, StringValuePattern,
};

/// Matches XML documents against an XPath expression.
///
/// The compiled XPath is not `Send`, so the expression is validated once here and rebuilt for
/// every evaluation.
#[derive(Debug, Clone)]
pub struct XPathPattern {
    expression: String,
    namespaces: BTreeMap<String, String>,
    value_pattern: Option<Box<StringValuePattern>>,
}

impl XPathPattern {
    pub fn new(
        expression: &str,
        namespaces: BTreeMap<String, String>,
        value_pattern: Option<StringValuePattern>,
    ) -> Result<Self, Error> {
        compile(expression)?;

        Ok(Self {
            expression: expression.to_string(),
            namespaces,
            value_pattern: value_pattern.map(Box::new),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    pub fn evaluate(&self, actual: &str) -> MatchResult {
        let package = match parser::parse(actual) {
            Ok(package) => package,
            Err(_) => return MatchResult::NO_MATCH,
        };
        let document = package.as_document();

        let xpath = match compile(&self.expression) {
            Ok(xpath) => xpath,
            Err(_) => return MatchResult::NO_MATCH,
        };

        let mut context = Context::new();
        for (prefix, uri) in &self.namespaces {
            context.set_namespace(prefix, uri);
        }

        let value = match xpath.evaluate(&context, document.root()) {
            Ok(value) => value,
            Err(err) => {
                tracing::trace!("XPath '{}' failed to evaluate: {:?}", self.expression, err);
                return MatchResult::NO_MATCH;
            }
        };

        let candidates: Vec<String> = match value {
            Value::Nodeset(nodes) => nodes
                .document_order()
                .iter()
                .map(|node| node.string_value())
                .collect(),
            Value::Boolean(b) => {
                if self.value_pattern.is_none() {
                    return MatchResult::of(b);
                }
                vec![b.to_string()]
            }
            Value::Number(n) => vec![n.to_string()],
            Value::String(s) => vec![s],
        };

        match &self.value_pattern {
            None => MatchResult::of(!candidates.is_empty()),
            Some(pattern) if candidates.is_empty() => pattern.evaluate(None),
            Some(pattern) => MatchResult::any(candidates.iter().map(|c| pattern.evaluate(Some(c)))),
        }
    }

    pub fn describe(&self) -> String {
        match &self.value_pattern {
            None => self.expression.clone(),
            Some(p) => format!("{} {}", self.expression, p),
        }
    }

    pub(crate) fn write_definition(&self, def: &mut PatternDefinition) {
        def.matches_x_path = Some(ExpressionDefinition::new(
            &self.expression,
            self.value_pattern.as_deref(),
        ));
        if !self.namespaces.is_empty() {
            def.x_path_namespaces = Some(self.namespaces.clone());
        }
    }
}

fn compile(expression: &str) -> Result<XPath, Error> {
    Factory::new()
        .build(expression)
        .map_err(|e| Error::InvalidXPath(expression.to_string(), format!("{:?}", e)))?
        .ok_or_else(|| Error::InvalidXPath(expression.to_string(), "empty expression".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::matchers::pattern::equal_to;

    const ORDER: &str = r#"<order id="42"><item sku="A-1">pen</item><item sku="B-2">ink</item></order>"#;

    #[test]
    fn matches_when_nodes_exist() {
        let p = XPathPattern::new("/order/item", BTreeMap::new(), None).unwrap();
        assert!(p.evaluate(ORDER).is_exact_match());

        let p = XPathPattern::new("/order/customer", BTreeMap::new(), None).unwrap();
        assert!(!p.evaluate(ORDER).is_exact_match());
    }

    #[test]
    fn value_pattern_applies_to_any_node() {
        let p = XPathPattern::new("/order/item/text()", BTreeMap::new(), Some(equal_to("ink")))
            .unwrap();
        assert!(p.evaluate(ORDER).is_exact_match());

        let p = XPathPattern::new("/order/@id", BTreeMap::new(), Some(equal_to("41"))).unwrap();
        assert!(!p.evaluate(ORDER).is_exact_match());
    }

    #[test]
    fn boolean_expressions() {
        let p = XPathPattern::new("count(/order/item) = 2", BTreeMap::new(), None).unwrap();
        assert!(p.evaluate(ORDER).is_exact_match());
    }

    #[test]
    fn namespaces_are_bound() {
        let xml = r#"<s:envelope xmlns:s="urn:soap"><s:body>hi</s:body></s:envelope>"#;
        let mut ns = BTreeMap::new();
        ns.insert("soap".to_string(), "urn:soap".to_string());

        let p = XPathPattern::new("/soap:envelope/soap:body", ns, None).unwrap();
        assert!(p.evaluate(xml).is_exact_match());
    }

    #[test]
    fn malformed_documents_do_not_match() {
        let p = XPathPattern::new("/order", BTreeMap::new(), None).unwrap();
        assert_eq!(p.evaluate("<order>"), MatchResult::NO_MATCH);
        assert_eq!(p.evaluate("{\"json\": true}"), MatchResult::NO_MATCH);
    }

    #[test]
    fn invalid_expression_fails_construction() {
        assert!(matches!(
            XPathPattern::new("/order[", BTreeMap::new(), None),
            Err(Error::InvalidXPath(_, _))
        ));
    }
}

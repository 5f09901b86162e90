//! 元素筛选器 (Element Finder)
//!
//! 在候选元素集中依文本规则挑出目标节点，替代脆弱的绝对路径选择器。

use scraper::ElementRef;

/// 元素匹配规则
pub trait ElementMatchRule {
    fn matches(&self, element: &ElementRef<'_>) -> bool;
}

/// 元素合并文本以指定前缀开头
pub struct TextStartsWithRule<'a> {
    pub prefix: &'a str,
}

impl ElementMatchRule for TextStartsWithRule<'_> {
    fn matches(&self, element: &ElementRef<'_>) -> bool {
        joined_text(element).starts_with(self.prefix)
    }
}

/// 元素合并文本完全等于指定字符串
pub struct TextEqualsRule<'a> {
    pub text: &'a str,
}

impl ElementMatchRule for TextEqualsRule<'_> {
    fn matches(&self, element: &ElementRef<'_>) -> bool {
        joined_text(element) == self.text
    }
}

/// 取第一个命中规则的元素
pub fn find_element_from<'a>(
    elements: impl IntoIterator<Item = ElementRef<'a>>,
    rule: &dyn ElementMatchRule,
) -> Option<ElementRef<'a>> {
    elements.into_iter().find(|el| rule.matches(el))
}

fn joined_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    #[test]
    fn picks_first_matching_element() {
        let doc = Html::parse_fragment(
            r#"
            <h1>NEWS</h1>
            <h1> TRACK CARGO shipment </h1>
            <h1>TRACK CARGO again</h1>
        "#,
        );
        let sel = Selector::parse("h1").unwrap();

        let found = find_element_from(doc.select(&sel), &TextStartsWithRule { prefix: "TRACK" })
            .expect("should match");
        assert!(joined_text(&found).contains("shipment"));

        assert!(find_element_from(doc.select(&sel), &TextEqualsRule { text: "NEWS" }).is_some());
        assert!(
            find_element_from(doc.select(&sel), &TextStartsWithRule { prefix: "VESSEL" }).is_none()
        );
    }
}

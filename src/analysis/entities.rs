use std::collections::BTreeMap;

use regex::Regex;
use serde_json::json;

use super::patterns::{
    self, CNPJ_RE, CPF_RE, DATE_RE, EMAIL_RE, MONEY_RE, PHONE_RE, PROCESS_NUMBER_RE,
};
use crate::models::Entity;

/// Concatenated document text with per-page offsets, the shared input of
/// entity extraction and point detection.
#[derive(Debug, Clone)]
pub struct PageMap {
    pub full_text: String,
    pages: Vec<(u32, usize, usize)>,
}

impl PageMap {
    /// Builds the map from (page number, page text) pairs. Pages must be
    /// supplied in ascending order; the concatenation joins them with a
    /// newline, mirroring the chunk separator layout.
    pub fn new(pages: &BTreeMap<u32, String>) -> Self {
        let mut full_text = String::new();
        let mut spans = Vec::new();
        for (&page, text) in pages {
            let start = full_text.len();
            full_text.push_str(text);
            full_text.push('\n');
            spans.push((page, start, full_text.len()));
        }
        Self { full_text, pages: spans }
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// The page containing a byte offset of the concatenated text.
    pub fn page_of_offset(&self, offset: usize) -> Option<u32> {
        self.pages
            .iter()
            .find(|(_, start, end)| offset >= *start && offset < *end)
            .map(|(page, _, _)| *page)
    }

    /// Converts a page-local byte offset into an offset in the
    /// concatenated text.
    pub fn global_offset(&self, page: u32, local_offset: usize) -> usize {
        self.pages
            .iter()
            .find(|(p, _, _)| *p == page)
            .map(|(_, start, _)| start + local_offset)
            .unwrap_or(local_offset)
    }

    pub fn page_text(&self, page: u32) -> Option<&str> {
        self.pages
            .iter()
            .find(|(p, _, _)| *p == page)
            .map(|(_, start, end)| self.full_text[*start..*end].trim_end_matches('\n'))
    }

    pub fn iter_pages(&self) -> impl Iterator<Item = (u32, &str)> {
        self.pages
            .iter()
            .map(|(page, start, end)| (*page, self.full_text[*start..*end].trim_end_matches('\n')))
    }
}

fn collect_entities(
    map: &PageMap,
    regex: &Regex,
    entity_type: &str,
    out: &mut Vec<Entity>,
) {
    for m in regex.find_iter(&map.full_text) {
        out.push(Entity {
            entity_type: entity_type.to_string(),
            text: m.as_str().to_string(),
            offset: m.start(),
            page: map.page_of_offset(m.start()),
        });
    }
}

/// Extracts every tagged span from the document: money values, phones,
/// e-mails, CNPJ/CPF, process numbers and dates.
pub fn extract_entities(map: &PageMap) -> Vec<Entity> {
    let mut entities = Vec::new();
    collect_entities(map, &MONEY_RE, "money", &mut entities);
    collect_entities(map, &CNPJ_RE, "cnpj", &mut entities);
    collect_entities(map, &CPF_RE, "cpf", &mut entities);
    collect_entities(map, &PHONE_RE, "phone", &mut entities);
    collect_entities(map, &EMAIL_RE, "email", &mut entities);
    collect_entities(map, &PROCESS_NUMBER_RE, "process_number", &mut entities);
    collect_entities(map, &DATE_RE, "deadline", &mut entities);
    entities.sort_by_key(|e| e.offset);
    entities
}

/// Business keywords present in the document, ordered by first occurrence.
pub fn extract_keywords(map: &PageMap) -> Vec<String> {
    let text_lower = map.full_text.to_lowercase();
    let mut found: Vec<(usize, String)> = Vec::new();

    let dictionaries: &[&[&str]] = &[
        patterns::AUCTION_KEYWORDS,
        patterns::JUDICIAL_INDICATORS,
        patterns::DEBT_KEYWORDS,
    ];
    for dictionary in dictionaries {
        for keyword in *dictionary {
            if let Some(offset) = text_lower.find(&keyword.to_lowercase()) {
                if !found.iter().any(|(_, k)| k == keyword) {
                    found.push((offset, keyword.to_string()));
                }
            }
        }
    }
    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, k)| k).collect()
}

/// Aggregate business indicators consumed by the feature extractor and
/// the feedback dataset builder.
pub fn business_indicators(map: &PageMap) -> serde_json::Value {
    let text_lower = map.full_text.to_lowercase();
    let judicial = patterns::count_keywords(&text_lower, patterns::JUDICIAL_INDICATORS);
    let debt = patterns::count_keywords(&text_lower, patterns::DEBT_KEYWORDS);
    let auction = patterns::count_keywords(&text_lower, patterns::AUCTION_KEYWORDS);

    let legal_score = (judicial as f64 * 5.0).min(100.0);
    let risk_score = (debt as f64 * 10.0).min(100.0);
    let viability_score = ((auction as f64 * 15.0) - (debt as f64 * 5.0)).clamp(0.0, 100.0);

    json!({
        "judicial_keyword_count": judicial,
        "auction_keyword_count": auction,
        "debt_keyword_count": debt,
        "legal_score": legal_score,
        "risk_score": risk_score,
        "viability_score": viability_score,
    })
}

/// Monetary summary of the document.
pub fn financial_data(entities: &[Entity]) -> serde_json::Value {
    let amounts: Vec<f64> = entities
        .iter()
        .filter(|e| e.entity_type == "money")
        .filter_map(|e| {
            MONEY_RE
                .captures(&e.text)
                .and_then(|c| patterns::parse_brl(&c[1]))
        })
        .filter(|v| *v > 100.0)
        .collect();

    let max_value = amounts.iter().cloned().fold(0.0f64, f64::max);
    let total_value: f64 = amounts.iter().sum();

    json!({
        "amounts": amounts,
        "max_value": max_value,
        "total_value": total_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> PageMap {
        let mut pages = BTreeMap::new();
        pages.insert(1, "Edital de leilão. Avaliação R$ 300.000,00.".to_string());
        pages.insert(2, "Contato leiloeiro (11) 98765-4321, joao@tjsp.jus.br.".to_string());
        PageMap::new(&pages)
    }

    #[test]
    fn test_page_of_offset() {
        let map = sample_map();
        assert_eq!(map.page_of_offset(0), Some(1));
        let page2_offset = map.full_text.find("leiloeiro").unwrap();
        assert_eq!(map.page_of_offset(page2_offset), Some(2));
    }

    #[test]
    fn test_extract_entities_with_pages() {
        let map = sample_map();
        let entities = extract_entities(&map);

        let money: Vec<_> = entities.iter().filter(|e| e.entity_type == "money").collect();
        assert_eq!(money.len(), 1);
        assert_eq!(money[0].page, Some(1));

        let phones: Vec<_> = entities.iter().filter(|e| e.entity_type == "phone").collect();
        assert_eq!(phones.len(), 1);
        assert_eq!(phones[0].page, Some(2));

        assert!(entities.iter().any(|e| e.entity_type == "email"));
    }

    #[test]
    fn test_financial_data_summary() {
        let map = sample_map();
        let entities = extract_entities(&map);
        let data = financial_data(&entities);
        assert_eq!(data["max_value"], 300_000.0);
        assert_eq!(data["total_value"], 300_000.0);
    }

    #[test]
    fn test_keywords_ordered_by_occurrence() {
        let map = sample_map();
        let keywords = extract_keywords(&map);
        assert!(!keywords.is_empty());
        assert_eq!(keywords[0], "leilão");
    }
}

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::Entity;

/// Dimensionality of every feature vector consumed by the ensemble.
pub const FEATURE_COUNT: usize = 40;

/// Keyword dictionaries backing the judicial-auction features. Owned by
/// this module; not substitutable at runtime.
pub mod keywords {
    pub const JUDICIAL_AUCTION: &[&str] = &[
        "leilão judicial",
        "hasta pública",
        "arrematação",
        "execução fiscal",
        "penhora",
        "alienação judicial",
        "hasta",
        "leilão",
        "arrematante",
        "adjudicação",
        "execução",
        "expropriação",
    ];

    pub const LEGAL_NOTIFICATIONS: &[&str] = &[
        "edital",
        "intimação",
        "citação",
        "diário oficial",
        "publicação",
        "notificação",
        "cientificação",
        "comunicação",
        "aviso",
        "art. 889",
        "cpc",
        "código de processo civil",
    ];

    pub const PROPERTY_VALUATION: &[&str] = &[
        "avaliação",
        "laudo",
        "perícia",
        "valor de mercado",
        "valor venal",
        "valor da avaliação",
        "preço",
        "lance mínimo",
        "primeira praça",
        "segunda praça",
        "valor inicial",
    ];

    pub const POSITIVE_STATUS: &[&str] =
        &["desocupado", "livre", "vago", "desembaraçado", "sem ocupantes"];

    pub const NEGATIVE_STATUS: &[&str] =
        &["inquilino", "locatário", "posseiro", "ocupação irregular"];

    pub const LEGAL_COMPLIANCE: &[&str] = &[
        "regular",
        "conforme",
        "legal",
        "válido",
        "procedimento correto",
        "dentro do prazo",
        "publicado",
        "intimado",
        "notificado",
        "cumprimento",
        "observância",
    ];

    pub const FINANCIAL_DATA: &[&str] = &[
        "débito",
        "dívida",
        "iptu",
        "condomínio",
        "taxa",
        "imposto",
        "financiamento",
        "hipoteca",
        "ônus",
        "gravame",
        "encargo",
        "quitação",
        "pagamento",
    ];

    pub const LEGAL_RESTRICTIONS: &[&str] = &[
        "indisponibilidade",
        "penhora",
        "arresto",
        "sequestro",
        "bloqueio",
        "restrição",
        "impedimento",
        "gravame",
        "ônus real",
        "usufruto",
        "servidão",
    ];

    pub const INVESTMENT_OPPORTUNITY: &[&str] = &[
        "oportunidade",
        "investimento",
        "negócio",
        "aquisição",
        "compra",
        "desconto",
        "abaixo do mercado",
        "barganha",
        "rentabilidade",
        "valorização",
    ];

    pub const URGENCY_INDICATORS: &[&str] = &[
        "prazo",
        "vencimento",
        "data limite",
        "até",
        "antes de",
        "urgente",
        "imediato",
        "breve",
        "em breve",
    ];

    pub const DECISION_AUTHORITIES: &[&str] = &[
        "juiz",
        "magistrado",
        "leiloeiro",
        "oficial de justiça",
        "escrivão",
        "cartório",
        "tribunal",
        "vara",
        "foro",
        "comarca",
        "instância",
    ];

    pub const DISCOUNT_PATTERNS: &[&str] = &[
        "abaixo do mercado",
        "desconto",
        "barganha",
        "oportunidade",
        "50%",
        "metade",
        "menor preço",
        "lance mínimo",
    ];

    pub const MARKET_VALUE_PATTERNS: &[&str] = &[
        "valor de mercado",
        "avaliação",
        "preço de mercado",
        "valor venal",
        "valor da avaliação",
    ];
}

static DEADLINE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\d+\s+(?:dias?|semanas?|meses?|anos?)",
        r"até\s+\d+",
        r"prazo\s+de\s+\d+",
        r"deadline",
        r"vencimento",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Portuguese function words used by the lightweight language guess.
const PT_MARKERS: &[&str] =
    &[" de ", " da ", " do ", " que ", " para ", " com ", " uma ", " não ", " os ", " as "];
const EN_MARKERS: &[&str] =
    &[" the ", " of ", " and ", " to ", " in ", " that ", " for ", " with "];

/// The 40-dimension feature vector. Numeric fields default to 0.0 and
/// boolean flags to 0.0/1.0 so an absent source field contributes nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureVector {
    pub text_length: f64,
    pub word_count: f64,
    pub sentence_count: f64,
    pub paragraph_count: f64,
    pub lang_pt: f64,
    pub lang_en: f64,
    pub lang_es: f64,
    pub lang_fr: f64,
    pub lang_de: f64,
    pub lang_other: f64,
    pub language_confidence: f64,
    pub readability_score: f64,
    pub cnpj_count: f64,
    pub cpf_count: f64,
    pub phone_count: f64,
    pub email_count: f64,
    pub money_count: f64,
    pub company_count: f64,
    pub has_financial_values: f64,
    pub max_financial_value: f64,
    pub total_financial_value: f64,
    pub financial_keywords_count: f64,
    pub urgency_score: f64,
    pub urgency_keywords_count: f64,
    pub deadline_mentioned: f64,
    pub judicial_auction_score: f64,
    pub legal_notifications_count: f64,
    pub property_valuation_indicators: f64,
    pub property_status_score: f64,
    pub legal_restrictions_count: f64,
    pub legal_compliance_score: f64,
    pub risk_level_score: f64,
    pub legal_authority_mentions: f64,
    pub property_discount_indicators: f64,
    pub market_value_mentions: f64,
    pub auction_urgency_score: f64,
    pub investment_viability_score: f64,
    pub entity_density: f64,
    pub financial_density: f64,
    pub contact_completeness: f64,
}

impl FeatureVector {
    pub fn names() -> [&'static str; FEATURE_COUNT] {
        [
            "text_length",
            "word_count",
            "sentence_count",
            "paragraph_count",
            "lang_pt",
            "lang_en",
            "lang_es",
            "lang_fr",
            "lang_de",
            "lang_other",
            "language_confidence",
            "readability_score",
            "cnpj_count",
            "cpf_count",
            "phone_count",
            "email_count",
            "money_count",
            "company_count",
            "has_financial_values",
            "max_financial_value",
            "total_financial_value",
            "financial_keywords_count",
            "urgency_score",
            "urgency_keywords_count",
            "deadline_mentioned",
            "judicial_auction_score",
            "legal_notifications_count",
            "property_valuation_indicators",
            "property_status_score",
            "legal_restrictions_count",
            "legal_compliance_score",
            "risk_level_score",
            "legal_authority_mentions",
            "property_discount_indicators",
            "market_value_mentions",
            "auction_urgency_score",
            "investment_viability_score",
            "entity_density",
            "financial_density",
            "contact_completeness",
        ]
    }

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.text_length,
            self.word_count,
            self.sentence_count,
            self.paragraph_count,
            self.lang_pt,
            self.lang_en,
            self.lang_es,
            self.lang_fr,
            self.lang_de,
            self.lang_other,
            self.language_confidence,
            self.readability_score,
            self.cnpj_count,
            self.cpf_count,
            self.phone_count,
            self.email_count,
            self.money_count,
            self.company_count,
            self.has_financial_values,
            self.max_financial_value,
            self.total_financial_value,
            self.financial_keywords_count,
            self.urgency_score,
            self.urgency_keywords_count,
            self.deadline_mentioned,
            self.judicial_auction_score,
            self.legal_notifications_count,
            self.property_valuation_indicators,
            self.property_status_score,
            self.legal_restrictions_count,
            self.legal_compliance_score,
            self.risk_level_score,
            self.legal_authority_mentions,
            self.property_discount_indicators,
            self.market_value_mentions,
            self.auction_urgency_score,
            self.investment_viability_score,
            self.entity_density,
            self.financial_density,
            self.contact_completeness,
        ]
    }
}

fn count_keywords(text_lower: &str, keywords: &[&str]) -> f64 {
    keywords
        .iter()
        .map(|kw| text_lower.matches(kw).count())
        .sum::<usize>() as f64
}

fn entity_count_of(entities: &[Entity], entity_type: &str) -> f64 {
    entities.iter().filter(|e| e.entity_type == entity_type).count() as f64
}

/// Simplified Flesch-like readability: shorter sentences and shorter words
/// score closer to 100.
fn readability(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let sentences = text.split('.').count();
    if sentences == 0 || words.is_empty() {
        return 0.0;
    }
    let avg_words_per_sentence = words.len() as f64 / sentences as f64;
    let avg_chars_per_word =
        words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64;
    let raw = avg_words_per_sentence * 1.5 + avg_chars_per_word * 2.0;
    (100.0 - (raw - 10.0) * 2.0).clamp(0.0, 100.0)
}

fn detect_language(text_lower: &str) -> (&'static str, f64) {
    let pt = count_keywords(text_lower, PT_MARKERS);
    let en = count_keywords(text_lower, EN_MARKERS);
    let total = pt + en;
    if total == 0.0 {
        return ("unknown", 0.0);
    }
    if pt >= en {
        ("pt", (pt / total).min(1.0))
    } else {
        ("en", (en / total).min(1.0))
    }
}

/// Input to feature extraction: the document text plus the entities the
/// analyzer already found.
#[derive(Debug, Clone)]
pub struct FeatureInput<'a> {
    pub text: &'a str,
    pub entities: &'a [Entity],
}

/// Seam between the two extraction modes. The scoring engine selects an
/// implementation per job; both produce the same 40-dimension layout.
pub trait FeatureStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, input: &FeatureInput<'_>) -> FeatureVector;
}

/// Default keyword-driven extractor.
pub struct StandardFeatures;

impl FeatureStrategy for StandardFeatures {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn extract(&self, input: &FeatureInput<'_>) -> FeatureVector {
        let text = input.text;
        let text_lower = text.to_lowercase();
        let entities = input.entities;
        let mut features = FeatureVector::default();

        // Size
        features.text_length = text.len() as f64;
        let word_count = text.split_whitespace().count() as f64;
        features.word_count = word_count;
        features.sentence_count = text.split('.').count() as f64;
        features.paragraph_count = text.split("\n\n").count() as f64;

        // Linguistic
        let (language, confidence) = detect_language(&text_lower);
        match language {
            "pt" => features.lang_pt = 1.0,
            "en" => features.lang_en = 1.0,
            "es" => features.lang_es = 1.0,
            "fr" => features.lang_fr = 1.0,
            "de" => features.lang_de = 1.0,
            _ => features.lang_other = 1.0,
        }
        features.language_confidence = confidence;
        features.readability_score = readability(text);

        // Entities
        features.cnpj_count = entity_count_of(entities, "cnpj");
        features.cpf_count = entity_count_of(entities, "cpf");
        features.phone_count = entity_count_of(entities, "phone");
        features.email_count = entity_count_of(entities, "email");
        features.money_count = entity_count_of(entities, "money");
        features.company_count = entity_count_of(entities, "company");

        // Financial
        let amounts: Vec<f64> = entities
            .iter()
            .filter(|e| e.entity_type == "money")
            .filter_map(|e| {
                crate::analysis::patterns::MONEY_RE
                    .captures(&e.text)
                    .and_then(|c| crate::analysis::patterns::parse_brl(&c[1]))
            })
            .filter(|v| *v > 100.0)
            .collect();
        features.has_financial_values = if features.money_count > 0.0 { 1.0 } else { 0.0 };
        features.max_financial_value = amounts.iter().cloned().fold(0.0, f64::max);
        features.total_financial_value = amounts.iter().sum();
        features.financial_keywords_count = count_keywords(&text_lower, keywords::FINANCIAL_DATA);

        // Urgency
        features.urgency_keywords_count =
            count_keywords(&text_lower, keywords::URGENCY_INDICATORS);
        features.deadline_mentioned = if DEADLINE_RES.iter().any(|re| re.is_match(&text_lower)) {
            1.0
        } else {
            0.0
        };
        features.urgency_score = (features.urgency_keywords_count * 20.0
            + if features.deadline_mentioned > 0.0 { 30.0 } else { 0.0 })
        .min(100.0);

        // Judicial auction
        let judicial = count_keywords(&text_lower, keywords::JUDICIAL_AUCTION);
        features.judicial_auction_score = (judicial * 25.0).min(100.0);
        features.legal_notifications_count =
            count_keywords(&text_lower, keywords::LEGAL_NOTIFICATIONS);
        features.property_valuation_indicators =
            count_keywords(&text_lower, keywords::PROPERTY_VALUATION);

        let positive = count_keywords(&text_lower, keywords::POSITIVE_STATUS);
        let negative = count_keywords(&text_lower, keywords::NEGATIVE_STATUS);
        features.property_status_score = if positive > negative {
            (positive * 30.0).min(100.0)
        } else {
            (-negative * 20.0).max(-50.0)
        };
        features.legal_restrictions_count =
            count_keywords(&text_lower, keywords::LEGAL_RESTRICTIONS);

        // Compliance and risk
        let compliance = count_keywords(&text_lower, keywords::LEGAL_COMPLIANCE);
        features.legal_authority_mentions =
            count_keywords(&text_lower, keywords::DECISION_AUTHORITIES);
        features.legal_compliance_score =
            (compliance * 20.0).min(100.0) + (features.legal_authority_mentions * 5.0).min(25.0);
        features.risk_level_score =
            (features.legal_restrictions_count * 10.0 - compliance * 5.0).clamp(0.0, 100.0);

        // Opportunity
        let opportunity = count_keywords(&text_lower, keywords::INVESTMENT_OPPORTUNITY);
        features.investment_viability_score = (opportunity * 15.0).min(100.0);
        features.property_discount_indicators =
            count_keywords(&text_lower, keywords::DISCOUNT_PATTERNS);
        features.market_value_mentions =
            count_keywords(&text_lower, keywords::MARKET_VALUE_PATTERNS);
        features.auction_urgency_score = (features.urgency_keywords_count * 20.0).min(100.0);

        // Derived
        if word_count > 0.0 {
            features.entity_density = entities.len() as f64 / word_count;
        }
        if features.text_length > 0.0 {
            features.financial_density =
                features.money_count / features.text_length * 1000.0;
        }
        let contact_types = [features.phone_count, features.email_count, features.cnpj_count];
        let available = contact_types.iter().filter(|c| **c > 0.0).count() as f64;
        features.contact_completeness = available / contact_types.len() as f64 * 100.0;

        features
    }
}

/// Richer assessment produced by the enhanced extractor, consumed by the
/// scoring engine's confidence-weighted blend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedAssessment {
    /// Rubric total in [0, 100]: financial attractiveness (0-30), legal
    /// quality (0-25), document quality (0-20), opportunity (0-15) and
    /// risk mitigation (0-10).
    pub adjusted_score: f64,
    /// How much of the rubric had supporting signal, in [0, 100].
    pub extraction_confidence: f64,
    pub financial_attractiveness: f64,
    pub legal_quality: f64,
    pub document_quality: f64,
    pub opportunity: f64,
    pub risk_mitigation: f64,
}

/// Enhanced extractor: same 40-dimension vector plus a rubric assessment.
pub struct EnhancedFeatures;

impl EnhancedFeatures {
    pub fn assess(&self, input: &FeatureInput<'_>) -> EnhancedAssessment {
        let features = StandardFeatures.extract(input);

        // Financial attractiveness 0-30: value presence and magnitude.
        let financial = if features.max_financial_value > 0.0 {
            let magnitude = (features.max_financial_value.log10() * 4.0).clamp(0.0, 22.0);
            (8.0 + magnitude).min(30.0)
        } else {
            0.0
        };

        // Legal quality 0-25: compliance minus restriction pressure.
        let legal = (features.legal_compliance_score / 125.0 * 25.0
            - features.legal_restrictions_count * 2.0)
            .clamp(0.0, 25.0);

        // Document quality 0-20: readability and completeness signals.
        let document = (features.readability_score / 100.0 * 12.0
            + features.contact_completeness / 100.0 * 8.0)
            .clamp(0.0, 20.0);

        // Opportunity 0-15.
        let opportunity = (features.property_discount_indicators * 3.0
            + features.investment_viability_score / 100.0 * 6.0)
            .clamp(0.0, 15.0);

        // Risk mitigation 0-10: fewer restrictions scores higher.
        let risk = (10.0 - features.risk_level_score / 10.0).clamp(0.0, 10.0);

        let components_with_signal = [financial, legal, document, opportunity, risk]
            .iter()
            .filter(|c| **c > 0.0)
            .count() as f64;
        let extraction_confidence = components_with_signal / 5.0 * 100.0;

        EnhancedAssessment {
            adjusted_score: financial + legal + document + opportunity + risk,
            extraction_confidence,
            financial_attractiveness: financial,
            legal_quality: legal,
            document_quality: document,
            opportunity,
            risk_mitigation: risk,
        }
    }
}

impl FeatureStrategy for EnhancedFeatures {
    fn name(&self) -> &'static str {
        "enhanced"
    }

    fn extract(&self, input: &FeatureInput<'_>) -> FeatureVector {
        StandardFeatures.extract(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{PageMap, extract_entities};
    use std::collections::BTreeMap;

    fn input_fixture() -> (String, Vec<Entity>) {
        let mut pages = BTreeMap::new();
        pages.insert(
            1,
            "Edital de leilão judicial. Avaliação R$ 300.000,00, lance mínimo R$ 200.000,00. \
             Prazo de 15 dias para pagamento. Contato (11) 98765-4321, leiloeiro@tjsp.jus.br."
                .to_string(),
        );
        let map = PageMap::new(&pages);
        let entities = extract_entities(&map);
        (map.full_text, entities)
    }

    #[test]
    fn test_vector_has_exactly_forty_dimensions() {
        assert_eq!(FeatureVector::names().len(), FEATURE_COUNT);
        assert_eq!(FeatureVector::default().to_array().len(), FEATURE_COUNT);
    }

    #[test]
    fn test_absent_fields_are_zero_filled() {
        let features = StandardFeatures.extract(&FeatureInput { text: "", entities: &[] });
        assert_eq!(features.max_financial_value, 0.0);
        assert_eq!(features.has_financial_values, 0.0);
        assert_eq!(features.entity_density, 0.0);
    }

    #[test]
    fn test_extraction_from_auction_text() {
        let (text, entities) = input_fixture();
        let features = StandardFeatures.extract(&FeatureInput { text: &text, entities: &entities });

        assert!(features.lang_pt > 0.0);
        assert_eq!(features.money_count, 2.0);
        assert_eq!(features.has_financial_values, 1.0);
        assert_eq!(features.max_financial_value, 300_000.0);
        assert_eq!(features.total_financial_value, 500_000.0);
        assert!(features.judicial_auction_score > 0.0);
        assert_eq!(features.deadline_mentioned, 1.0);
        assert!(features.urgency_score >= 30.0);
        // phone + email + no cnpj = two of three contact channels.
        assert!((features.contact_completeness - 66.66666666666667).abs() < 1e-9);
    }

    #[test]
    fn test_urgency_score_caps_at_100() {
        let text = "prazo ".repeat(30);
        let features = StandardFeatures.extract(&FeatureInput { text: &text, entities: &[] });
        assert_eq!(features.urgency_score, 100.0);
    }

    #[test]
    fn test_enhanced_assessment_bounds() {
        let (text, entities) = input_fixture();
        let assessment = EnhancedFeatures.assess(&FeatureInput { text: &text, entities: &entities });

        assert!(assessment.financial_attractiveness <= 30.0);
        assert!(assessment.legal_quality <= 25.0);
        assert!(assessment.document_quality <= 20.0);
        assert!(assessment.opportunity <= 15.0);
        assert!(assessment.risk_mitigation <= 10.0);
        assert!(assessment.adjusted_score <= 100.0);
        assert!(assessment.extraction_confidence > 0.0);
        assert!(assessment.extraction_confidence <= 100.0);
    }

    #[test]
    fn test_property_status_score_sign() {
        let positive = StandardFeatures.extract(&FeatureInput {
            text: "imóvel desocupado e livre",
            entities: &[],
        });
        assert!(positive.property_status_score > 0.0);

        let negative = StandardFeatures.extract(&FeatureInput {
            text: "imóvel com inquilino e posseiro",
            entities: &[],
        });
        assert!(negative.property_status_score < 0.0);
    }
}

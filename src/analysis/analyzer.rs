use regex::Regex;
use serde_json::json;

use super::entities::PageMap;
use super::patterns::{self, format_brl, parse_brl};
use crate::models::{AnalysisPoint, PointCategory, PointPriority, PointStatus};

/// Rule-based analyzer producing the ordered analysis points of a job.
///
/// Pure function of the concatenated text and filename: the same document
/// always yields the same points in the same order. Points are emitted in
/// category order (geral, leilão, investimento, financeiro, prazo,
/// contato) and by first detection offset within a category.
pub fn analyze(map: &PageMap, filename: &str) -> Vec<AnalysisPoint> {
    let text_lower = map.full_text.to_lowercase();
    let mut points = Vec::new();

    general_points(map, &text_lower, filename, &mut points);
    if is_judicial_document(&text_lower) {
        judicial_points(&text_lower, &mut points);
    }
    financial_points(map, &mut points);
    deadline_and_contact_points(map, &mut points);

    // Deterministic presentation order; the sort is stable so equal keys
    // keep emission order.
    points.sort_by_key(|p| (p.category.sort_rank(), p.detection_offset));
    points
}

pub fn is_judicial_document(text_lower: &str) -> bool {
    patterns::JUDICIAL_INDICATORS
        .iter()
        .any(|kw| text_lower.contains(kw))
}

pub fn detect_document_type(text_lower: &str, filename: &str) -> &'static str {
    let filename_lower = filename.to_lowercase();
    for (doc_type, keywords) in patterns::DOCUMENT_TYPES {
        if keywords
            .iter()
            .any(|kw| text_lower.contains(kw) || filename_lower.contains(kw))
        {
            return doc_type;
        }
    }
    patterns::DEFAULT_DOCUMENT_TYPE
}

fn general_points(
    map: &PageMap,
    text_lower: &str,
    filename: &str,
    points: &mut Vec<AnalysisPoint>,
) {
    let doc_type = detect_document_type(text_lower, filename);
    let total_pages = map.page_count();

    points.push(AnalysisPoint {
        id: "document_type".to_string(),
        title: format!("Tipo de Documento: {}", doc_type),
        comment: format!(
            "Documento identificado como {} com base no conteúdo e no nome do arquivo.",
            doc_type
        ),
        status: PointStatus::Confirmado,
        category: PointCategory::Geral,
        priority: PointPriority::Medium,
        page_reference: None,
        raw_value: None,
        details: Some(json!({
            "documentClassification": doc_type,
            "totalPages": total_pages,
        })),
        detection_offset: 0,
    });

    if total_pages > 1 {
        points.push(AnalysisPoint {
            id: "document_size".to_string(),
            title: format!("Documento Extenso: {} páginas", total_pages),
            comment: format!(
                "Documento contém {} páginas ({} caracteres). Análise página a página.",
                total_pages,
                map.full_text.len()
            ),
            status: PointStatus::Confirmado,
            category: PointCategory::Geral,
            priority: PointPriority::Low,
            page_reference: None,
            raw_value: None,
            details: Some(json!({
                "pageCount": total_pages,
                "characterCount": map.full_text.len(),
            })),
            detection_offset: 1,
        });
    }
}

fn judicial_points(text_lower: &str, points: &mut Vec<AnalysisPoint>) {
    if let Some(offset) = patterns::first_keyword_offset(text_lower, patterns::AUCTION_KEYWORDS) {
        points.push(AnalysisPoint {
            id: "auction_identified".to_string(),
            title: "Leilão Judicial Identificado".to_string(),
            comment: "Documento contém informações sobre leilão judicial. Verifique datas, \
                      valores e condições."
                .to_string(),
            status: PointStatus::Confirmado,
            category: PointCategory::Leilao,
            priority: PointPriority::High,
            page_reference: None,
            raw_value: None,
            details: None,
            detection_offset: offset,
        });
    }

    // At most one property-type point; the first listed type that matches
    // wins.
    for (prop_type, keywords) in patterns::PROPERTY_TYPES {
        if let Some(offset) = patterns::first_keyword_offset(text_lower, keywords) {
            points.push(AnalysisPoint {
                id: format!("property_{}", prop_type),
                title: format!("Bem do Tipo: {}", capitalize(prop_type)),
                comment: format!("Identificado bem do tipo {} no documento.", prop_type),
                status: PointStatus::Confirmado,
                category: PointCategory::Investimento,
                priority: PointPriority::High,
                page_reference: None,
                raw_value: None,
                details: None,
                detection_offset: offset,
            });
            break;
        }
    }

    if let Some(offset) = patterns::first_keyword_offset(text_lower, patterns::CPC_889_INDICATORS) {
        points.push(AnalysisPoint {
            id: "cpc_889_compliance".to_string(),
            title: "Referência ao CPC Art. 889".to_string(),
            comment: "Documento faz referência ao Artigo 889 do Código de Processo Civil - \
                      verifique a conformidade das intimações."
                .to_string(),
            status: PointStatus::Alerta,
            category: PointCategory::Leilao,
            priority: PointPriority::High,
            page_reference: None,
            raw_value: None,
            details: None,
            detection_offset: offset,
        });
    }
}

/// First significant (> 1000) contextual money match across pages.
fn find_value_in_pages(map: &PageMap, regexes: &[Regex]) -> Option<(f64, u32, String, usize)> {
    for regex in regexes {
        for (page, page_text) in map.iter_pages() {
            for captures in regex.captures_iter(page_text) {
                let raw = captures.get(1).map(|m| m.as_str().to_string())?;
                if let Some(value) = parse_brl(&raw) {
                    if value > 1000.0 {
                        let local = captures.get(0).map(|m| m.start()).unwrap_or(0);
                        return Some((value, page, raw, map.global_offset(page, local)));
                    }
                }
            }
        }
    }
    None
}

fn financial_points(map: &PageMap, points: &mut Vec<AnalysisPoint>) {
    let categories: [(&str, &str, &[Regex]); 3] = [
        ("lance_minimo", "Lance Mínimo", &patterns::LANCE_MINIMO_RES),
        ("avaliacao", "Valor de Avaliação", &patterns::AVALIACAO_RES),
        ("custas", "Custas e Despesas", &patterns::CUSTAS_RES),
    ];

    let mut lance_minimo: Option<f64> = None;
    let mut avaliacao: Option<f64> = None;

    for (key, label, regexes) in categories {
        let Some((value, page, raw, offset)) = find_value_in_pages(map, regexes) else {
            continue;
        };

        match key {
            "lance_minimo" => lance_minimo = Some(value),
            "avaliacao" => avaliacao = Some(value),
            _ => {}
        }

        points.push(AnalysisPoint {
            id: format!("{}_value", key),
            title: format!("{}: {}", label, format_brl(value)),
            comment: format!("Valor encontrado na página {}.", page),
            status: PointStatus::Confirmado,
            category: PointCategory::Financeiro,
            priority: PointPriority::High,
            page_reference: Some(page),
            raw_value: Some(raw),
            details: Some(json!({
                "valueType": key,
                "formattedValue": format_brl(value),
                "pageLocation": page,
            })),
            detection_offset: offset,
        });
    }

    // Discount opportunity when both bid and valuation are known.
    if let (Some(minimo), Some(aval)) = (lance_minimo, avaliacao) {
        if aval > minimo {
            let desconto = (aval - minimo) / aval * 100.0;
            points.push(AnalysisPoint {
                id: "investment_opportunity".to_string(),
                title: format!("Oportunidade de Investimento: {:.1}% de Desconto", desconto),
                comment: format!(
                    "Lance mínimo representa {:.1}% de desconto sobre a avaliação.",
                    desconto
                ),
                status: PointStatus::Confirmado,
                category: PointCategory::Investimento,
                priority: PointPriority::High,
                page_reference: None,
                raw_value: None,
                details: Some(json!({
                    "discountPercentage": format!("{:.1}%", desconto),
                    "potentialSavings": format_brl(aval - minimo),
                })),
                detection_offset: usize::MAX,
            });
        }
    }

    // Debt alert anchored to the first page mentioning any indicator.
    'debt: for (page, page_text) in map.iter_pages() {
        let page_lower = page_text.to_lowercase();
        for keyword in patterns::DEBT_KEYWORDS {
            if let Some(local) = page_lower.find(keyword) {
                let offset = map.global_offset(page, local);
                points.push(AnalysisPoint {
                    id: "debt_analysis".to_string(),
                    title: "Possíveis Ônus ou Dívidas Detectados".to_string(),
                    comment: format!(
                        "Documento menciona possíveis encargos na página {}. Verifique antes \
                         de investir.",
                        page
                    ),
                    status: PointStatus::Alerta,
                    category: PointCategory::Financeiro,
                    priority: PointPriority::High,
                    page_reference: Some(page),
                    raw_value: None,
                    details: Some(json!({
                        "riskLevel": "Alto",
                        "recommendation": "Verificação obrigatória antes do lance",
                    })),
                    detection_offset: offset,
                });
                break 'debt;
            }
        }
    }
}

fn find_date_in_pages(map: &PageMap, regexes: &[Regex]) -> Option<(String, u32, usize)> {
    for (page, page_text) in map.iter_pages() {
        for regex in regexes {
            if let Some(captures) = regex.captures(page_text) {
                let date = captures.get(1)?.as_str().to_string();
                let local = captures.get(0).map(|m| m.start()).unwrap_or(0);
                return Some((date, page, map.global_offset(page, local)));
            }
        }
    }
    None
}

fn deadline_and_contact_points(map: &PageMap, points: &mut Vec<AnalysisPoint>) {
    let deadline_categories: [(&str, &str, &[Regex]); 3] = [
        ("data_leilao", "Data do Leilão", &patterns::DATA_LEILAO_RES),
        ("prazo_pagamento", "Prazo para Pagamento", &patterns::PRAZO_PAGAMENTO_RES),
        ("prazo_recurso", "Prazo para Recurso", &patterns::PRAZO_RECURSO_RES),
    ];

    for (key, label, regexes) in deadline_categories {
        let Some((date, page, offset)) = find_date_in_pages(map, regexes) else {
            continue;
        };
        points.push(AnalysisPoint {
            id: format!("{}_deadline", key),
            title: format!("{}: {}", label, date),
            comment: format!("Data importante identificada na página {}.", page),
            status: PointStatus::Alerta,
            category: PointCategory::Prazo,
            priority: PointPriority::High,
            page_reference: Some(page),
            raw_value: Some(date.clone()),
            details: Some(json!({
                "dateType": key,
                "formattedDate": date,
            })),
            detection_offset: offset,
        });
    }

    // Leiloeiro phone in context.
    'phone: for regex in patterns::LEILOEIRO_PHONE_RES.iter() {
        for (page, page_text) in map.iter_pages() {
            if let Some(captures) = regex.captures(page_text) {
                if let Some(phone) = captures.get(1) {
                    points.push(AnalysisPoint {
                        id: "leiloeiro_contact".to_string(),
                        title: format!("Contato do Leiloeiro: {}", phone.as_str()),
                        comment: format!(
                            "Telefone do responsável pelo leilão encontrado na página {}.",
                            page
                        ),
                        status: PointStatus::Confirmado,
                        category: PointCategory::Contato,
                        priority: PointPriority::High,
                        page_reference: Some(page),
                        raw_value: Some(phone.as_str().to_string()),
                        details: Some(json!({
                            "contactType": "Leiloeiro Oficial",
                            "phoneNumber": phone.as_str(),
                        })),
                        detection_offset: map.global_offset(page, phone.start()),
                    });
                    break 'phone;
                }
            }
        }
    }

    // Official e-mail (tribunal / cartório / leilão domains).
    for (page, page_text) in map.iter_pages() {
        if let Some(m) = patterns::OFFICIAL_EMAIL_RE.find(page_text) {
            let email = m.as_str();
            let contact_type = if email.contains("tj") || email.contains("tribunal") {
                "Tribunal"
            } else {
                "Cartório/Leilão"
            };
            points.push(AnalysisPoint {
                id: "official_email".to_string(),
                title: format!("E-mail {}: {}", contact_type, email),
                comment: format!("Contato oficial encontrado na página {}.", page),
                status: PointStatus::Confirmado,
                category: PointCategory::Contato,
                priority: PointPriority::High,
                page_reference: Some(page),
                raw_value: Some(email.to_string()),
                details: Some(json!({
                    "contactType": contact_type,
                    "emailAddress": email,
                })),
                detection_offset: map.global_offset(page, m.start()),
            });
            break;
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map_of(pages: &[(u32, &str)]) -> PageMap {
        let mut tree = BTreeMap::new();
        for (page, text) in pages {
            tree.insert(*page, text.to_string());
        }
        PageMap::new(&tree)
    }

    #[test]
    fn test_cpc_889_alert_point() {
        let map = map_of(&[(1, "Nos termos do art. 889 do CPC, ficam intimados...")]);
        let points = analyze(&map, "edital.pdf");

        let cpc = points.iter().find(|p| p.id == "cpc_889_compliance").unwrap();
        assert_eq!(cpc.status, PointStatus::Alerta);
        assert_eq!(cpc.category, PointCategory::Leilao);
        assert_eq!(cpc.priority, PointPriority::High);
    }

    #[test]
    fn test_investment_opportunity_discount() {
        let map = map_of(&[
            (1, "Edital de leilão judicial."),
            (2, "Valor da avaliação R$ 300.000,00 conforme laudo."),
            (3, "Sem conteúdo relevante."),
            (4, "Sem conteúdo relevante."),
            (5, "Lance mínimo R$ 200.000,00 para a primeira praça."),
        ]);
        let points = analyze(&map, "edital.pdf");

        let opportunity = points.iter().find(|p| p.id == "investment_opportunity").unwrap();
        let details = opportunity.details.as_ref().unwrap();
        assert_eq!(details["discountPercentage"], "33.3%");

        let avaliacao = points.iter().find(|p| p.id == "avaliacao_value").unwrap();
        assert_eq!(avaliacao.page_reference, Some(2));
        let lance = points.iter().find(|p| p.id == "lance_minimo_value").unwrap();
        assert_eq!(lance.page_reference, Some(5));
    }

    #[test]
    fn test_no_opportunity_when_bid_above_valuation() {
        let map = map_of(&[
            (1, "Valor da avaliação R$ 100.000,00."),
            (2, "Lance mínimo R$ 150.000,00."),
        ]);
        let points = analyze(&map, "edital.pdf");
        assert!(points.iter().all(|p| p.id != "investment_opportunity"));
    }

    #[test]
    fn test_debt_alert_anchored_to_first_mentioning_page() {
        let map = map_of(&[
            (1, "Imóvel residencial em leilão."),
            (2, "Sobre o bem recai hipoteca registrada."),
            (3, "Também há débito de IPTU."),
        ]);
        let points = analyze(&map, "edital.pdf");
        let debt = points.iter().find(|p| p.id == "debt_analysis").unwrap();
        assert_eq!(debt.page_reference, Some(2));
        assert_eq!(debt.status, PointStatus::Alerta);
    }

    #[test]
    fn test_single_property_type_point() {
        let map = map_of(&[(1, "Leilão de apartamento e casa, imóvel urbano.")]);
        let points = analyze(&map, "edital.pdf");
        let type_points: Vec<_> =
            points.iter().filter(|p| p.id.starts_with("property_")).collect();
        assert_eq!(type_points.len(), 1);
        assert_eq!(type_points[0].id, "property_imóvel");
    }

    #[test]
    fn test_points_ordered_by_category() {
        let map = map_of(&[
            (1, "Edital de leilão judicial de imóvel, art. 889 do CPC."),
            (2, "Avaliação R$ 300.000,00. Lance mínimo R$ 200.000,00. Há dívida de condomínio."),
            (3, "Data do leilão: 15/09/2026. Contato do leiloeiro (11) 98765-4321."),
        ]);
        let points = analyze(&map, "edital.pdf");

        let ranks: Vec<i32> = points.iter().map(|p| p.category.sort_rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);

        assert_eq!(points[0].category, PointCategory::Geral);
        assert!(points.iter().any(|p| p.category == PointCategory::Contato));
    }

    #[test]
    fn test_page_references_within_page_range() {
        let map = map_of(&[
            (1, "Leilão: avaliação R$ 250.000,00, dívida de IPTU."),
            (2, "Prazo de pagamento até 10/10/2026."),
        ]);
        let points = analyze(&map, "edital.pdf");
        for point in &points {
            if let Some(page) = point.page_reference {
                assert!(page >= 1 && page <= map.page_count());
            }
        }
    }

    #[test]
    fn test_deterministic_output() {
        let map = map_of(&[
            (1, "Edital de leilão de imóvel. Avaliação R$ 300.000,00."),
            (2, "Lance mínimo R$ 200.000,00. Data do leilão 01/12/2026."),
        ]);
        let first = analyze(&map, "edital.pdf");
        let second = analyze(&map, "edital.pdf");
        let ids_first: Vec<&str> = first.iter().map(|p| p.id.as_str()).collect();
        let ids_second: Vec<&str> = second.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids_first, ids_second);
    }
}

use once_cell::sync::Lazy;
use regex::Regex;

/// Compiled patterns and keyword tables for Brazilian judicial auction
/// documents. Dictionaries are owned by this module; runtime substitution
/// is deliberately unsupported.

pub static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"R\$\s*([\d.,]+)").expect("valid regex"));

pub static CNPJ_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}").expect("valid regex"));

pub static CPF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{3}\.\d{3}\.\d{3}-\d{2}").expect("valid regex"));

pub static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\d{2}\)\s*\d{4,5}[-\s]?\d{4}").expect("valid regex"));

pub static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex")
});

/// CNJ unified process-number format.
pub static PROCESS_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}").expect("valid regex"));

pub static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").expect("valid regex"));

/// Official-looking e-mail in tribunal/cartório/leilão domains.
pub static OFFICIAL_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]*(?:tj|tribunal|cartorio|leilao)[a-zA-Z0-9.-]*\.[a-zA-Z]{2,})",
    )
    .expect("valid regex")
});

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
}

/// Contextual money captures per financial category. The first pattern
/// that yields a significant value wins for its category.
pub static LANCE_MINIMO_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)lance\s+m[ií]nimo.{0,80}?R\$\s*([\d.,]+)",
        r"(?i)valor\s+m[ií]nimo.{0,80}?R\$\s*([\d.,]+)",
        r"(?i)arremat\w*.{0,80}?R\$\s*([\d.,]+)",
    ])
});

pub static AVALIACAO_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)avalia[çc][ãa]o.{0,80}?R\$\s*([\d.,]+)",
        r"(?i)valor\s+de\s+avalia[çc][ãa]o.{0,80}?R\$\s*([\d.,]+)",
        r"(?i)avaliado\s+em.{0,80}?R\$\s*([\d.,]+)",
    ])
});

pub static CUSTAS_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)custas.{0,80}?R\$\s*([\d.,]+)",
        r"(?i)despesas.{0,80}?R\$\s*([\d.,]+)",
        r"(?i)emolumentos.{0,80}?R\$\s*([\d.,]+)",
    ])
});

/// Contextual date captures per deadline category.
pub static DATA_LEILAO_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)data\s+do\s+leil[ãa]o.{0,80}?(\d{1,2}/\d{1,2}/\d{4})",
        r"(?i)leil[ãa]o.{0,80}?(\d{1,2}/\d{1,2}/\d{4})",
        r"(?i)realizar[áa]\s+em.{0,80}?(\d{1,2}/\d{1,2}/\d{4})",
    ])
});

pub static PRAZO_PAGAMENTO_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)prazo.{0,80}?pagamento.{0,80}?(\d{1,2}/\d{1,2}/\d{4})",
        r"(?i)at[ée]\s+(\d{1,2}/\d{1,2}/\d{4}).{0,40}?pagar",
        r"(?i)vencimento.{0,80}?(\d{1,2}/\d{1,2}/\d{4})",
    ])
});

pub static PRAZO_RECURSO_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)prazo.{0,80}?recurso.{0,80}?(\d{1,2}/\d{1,2}/\d{4})",
        r"(?i)impugna[çc][ãa]o.{0,80}?at[ée].{0,40}?(\d{1,2}/\d{1,2}/\d{4})",
    ])
});

pub static LEILOEIRO_PHONE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)leiloeiro.{0,120}?(\(\d{2}\)\s*\d{4,5}[-\s]?\d{4})",
        r"(?i)respons[áa]vel.{0,120}?(\(\d{2}\)\s*\d{4,5}[-\s]?\d{4})",
    ])
});

pub const AUCTION_KEYWORDS: &[&str] =
    &["leilão", "leilao", "hasta pública", "hasta publica", "arrematação"];

pub const JUDICIAL_INDICATORS: &[&str] = &[
    "leilão",
    "leilao",
    "hasta pública",
    "hasta publica",
    "tribunal",
    "vara",
    "juiz",
    "processo",
    "código de processo civil",
    "cpc",
    "arrematação",
    "arremataçao",
    "adjudicação",
    "penhora",
    "execução",
    "execucao",
];

pub const CPC_889_INDICATORS: &[&str] =
    &["art. 889", "artigo 889", "cpc 889", "código de processo civil"];

pub const DEBT_KEYWORDS: &[&str] = &[
    "dívida",
    "divida",
    "débito",
    "debito",
    "ônus",
    "onus",
    "hipoteca",
    "financiamento",
];

/// Property types with their trigger keywords; at most one type point is
/// emitted, first listed type wins.
pub const PROPERTY_TYPES: &[(&str, &[&str])] = &[
    ("imóvel", &["imovel", "imóvel", "propriedade", "terreno", "lote"]),
    ("apartamento", &["apartamento", "apt", "unidade"]),
    ("casa", &["casa", "residencia", "residência"]),
    ("comercial", &["comercial", "loja", "escritorio", "escritório", "sala comercial"]),
    ("veículo", &["veiculo", "veículo", "automóvel", "automovel", "carro", "moto"]),
];

/// Document types by content/filename keywords; first match wins.
pub const DOCUMENT_TYPES: &[(&str, &[&str])] = &[
    ("Edital de Leilão", &["edital", "leilão", "leilao", "hasta"]),
    ("Processo Judicial", &["processo", "autos", "vara", "tribunal"]),
    ("Laudo de Avaliação", &["laudo", "avaliação", "avaliacao", "perito"]),
    ("Certidão", &["certidao", "certidão", "registro"]),
    ("Contrato", &["contrato", "acordo", "ajuste"]),
    ("Escritura", &["escritura", "tabeliao", "tabelião", "cartorio"]),
];

pub const DEFAULT_DOCUMENT_TYPE: &str = "Documento Jurídico";

/// Parses a Brazilian-formatted currency amount ("300.000,00" -> 300000.0).
pub fn parse_brl(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace('.', "").replace(',', ".");
    normalized.parse::<f64>().ok()
}

/// Formats a value in Brazilian currency style ("R$ 300.000,00").
pub fn format_brl(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let integer = cents / 100;
    let fraction = cents % 100;

    let digits = integer.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("R$ {}{},{:02}", if negative { "-" } else { "" }, grouped, fraction)
}

/// Case-insensitive occurrence count of each keyword in the text.
pub fn count_keywords(text_lower: &str, keywords: &[&str]) -> usize {
    keywords
        .iter()
        .map(|kw| text_lower.matches(&kw.to_lowercase()).count())
        .sum()
}

/// Byte offset of the first occurrence of any keyword, if present.
pub fn first_keyword_offset(text_lower: &str, keywords: &[&str]) -> Option<usize> {
    keywords
        .iter()
        .filter_map(|kw| text_lower.find(&kw.to_lowercase()))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_brl() {
        assert_eq!(parse_brl("300.000,00"), Some(300_000.0));
        assert_eq!(parse_brl("1.234,56"), Some(1234.56));
        assert_eq!(parse_brl("950"), Some(950.0));
        assert_eq!(parse_brl("abc"), None);
    }

    #[test]
    fn test_format_brl() {
        assert_eq!(format_brl(300_000.0), "R$ 300.000,00");
        assert_eq!(format_brl(1234.5), "R$ 1.234,50");
        assert_eq!(format_brl(950.0), "R$ 950,00");
    }

    #[test]
    fn test_contextual_value_capture() {
        let text = "O valor da avaliação R$ 300.000,00 conforme laudo.";
        let captures = AVALIACAO_RES[0].captures(text).unwrap();
        assert_eq!(&captures[1], "300.000,00");
    }

    #[test]
    fn test_official_email_detection() {
        let text = "Contato: atendimento@tjsp.jus.br para dúvidas.";
        let m = OFFICIAL_EMAIL_RE.find(text).unwrap();
        assert_eq!(m.as_str(), "atendimento@tjsp.jus.br");
        assert!(OFFICIAL_EMAIL_RE.find("joao@gmail.com").is_none());
    }

    #[test]
    fn test_process_number_detection() {
        assert!(PROCESS_NUMBER_RE.is_match("Processo nº 1234567-89.2024.8.26.0100"));
    }

    #[test]
    fn test_first_keyword_offset() {
        let text = "edital de leilão judicial";
        assert_eq!(first_keyword_offset(text, AUCTION_KEYWORDS), Some(10));
        assert_eq!(first_keyword_offset("nada aqui", AUCTION_KEYWORDS), None);
    }
}

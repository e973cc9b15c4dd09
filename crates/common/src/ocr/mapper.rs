//! OCR result to invoice draft

use super::{OcrField, OcrLineItem, OcrResult};
use crate::db::models::{check_amount, CurrencyType, InvoiceStatus};
use crate::errors::Result;
use crate::workflow::{FileMeta, NewInvoice};
use chrono::NaiveDate;
use regex_lite::Regex;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::OnceLock;

/// Placeholder for a required text field the provider could not read
pub const PENDING: &str = "PENDING";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Build a Submitted draft from an extraction.
///
/// Blank invoice number, vendor name or vendor tax id become [`PENDING`]
/// and mark the draft for review. Absent amounts stay `None`; negative
/// amounts are rejected.
pub fn map_to_invoice(ocr: &OcrResult, created_by: &str, file: FileMeta) -> Result<NewInvoice> {
    let mut requires_review = false;

    let invoice_number = required_text(&ocr.invoice_number, &mut requires_review);
    let vendor_name = required_text(&ocr.vendor_name, &mut requires_review);

    let mut draft = NewInvoice::new(invoice_number, vendor_name, created_by);
    draft.vendor_tax_id = required_text(&ocr.vendor_tax_id, &mut requires_review);
    draft.vendor_address = optional_text(&ocr.vendor_address);
    draft.customer_name = optional_text(&ocr.customer_name);
    draft.customer_address = optional_text(&ocr.customer_address);

    draft.invoice_date = date(&ocr.invoice_date);
    draft.due_date = date(&ocr.due_date);

    draft.invoice_value = amount(&ocr.invoice_value, "invoice_value")?;
    draft.subtotal = amount(&ocr.subtotal, "subtotal")?;
    draft.tax_amount = amount(&ocr.tax_amount, "tax_amount")?;
    draft.currency = currency(&ocr.currency);

    draft.line_items = line_items(&ocr.line_items)?;
    draft.field_confidence = field_confidence(ocr);
    draft.confidence_score = ocr.confidence_score;
    draft.ocr_raw_text = ocr.raw_text.clone();

    draft.status = InvoiceStatus::Submitted;
    draft.requires_review = requires_review;
    draft.file = Some(file);

    Ok(draft)
}

/// Parse a money amount such as `"AED 1,250.00"`, `"-45.10 USD"` or
/// `"(1,200.00)"`.
///
/// The whole text must be a single amount with at most a currency code or
/// symbol on either side. Labels, unknown codes, percentages or a second
/// number yield `None` rather than a guess.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    static AMOUNT: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = AMOUNT
        .get_or_init(|| {
            Regex::new(
                r"^(-)?\s*(?:([A-Za-z]{3}|US\$|[$€£₹])(\s*)(-)?\s*)?(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?\s*([A-Za-z]{3}|[$€£₹])?$",
            )
            .ok()
        })
        .as_ref()?;

    // Accounting style "(1,200.00)"
    let trimmed = text.trim();
    let (body, parenthesized) = match trimmed.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (inner.trim(), true),
        None => (trimmed, false),
    };

    let caps = pattern.captures(body)?;
    let known_code = |i: usize| {
        caps.get(i).map_or(true, |m| {
            let code = m.as_str();
            !code.chars().all(|c| c.is_ascii_alphabetic()) || CurrencyType::parse(code).is_some()
        })
    };
    if !known_code(2) || !known_code(7) {
        return None;
    }
    let whole = caps.get(5)?.as_str().replace(',', "");
    let fraction = caps.get(6).map_or("", |m| m.as_str());

    // "AED-1,250.00": a hyphen glued to a currency code separates, it does not negate
    let code_separator = caps
        .get(2)
        .is_some_and(|code| code.as_str().chars().all(|c| c.is_ascii_alphabetic()))
        && caps.get(3).is_some_and(|gap| gap.as_str().is_empty());
    let inner_minus = caps.get(4).is_some() && !code_separator;
    let negative = parenthesized || caps.get(1).is_some() || inner_minus;

    let sign = if negative { "-" } else { "" };
    Decimal::from_str(&format!("{}{}{}", sign, whole, fraction)).ok()
}

fn required_text(field: &OcrField<String>, requires_review: &mut bool) -> String {
    match optional_text(field) {
        Some(text) => text,
        None => {
            *requires_review = true;
            PENDING.to_string()
        }
    }
}

fn optional_text(field: &OcrField<String>) -> Option<String> {
    [field.value.as_deref(), field.content.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn date(field: &OcrField<NaiveDate>) -> Option<NaiveDate> {
    field.value.or_else(|| {
        let text = field.content.as_deref()?.trim();
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
    })
}

fn amount(field: &OcrField<Decimal>, name: &str) -> Result<Option<Decimal>> {
    let value = field
        .value
        .or_else(|| field.content.as_deref().and_then(parse_amount));

    if let Some(v) = value {
        check_amount(name, v)?;
    }
    Ok(value)
}

fn currency(field: &OcrField<String>) -> Option<CurrencyType> {
    let text = field.value.as_deref().or(field.content.as_deref())?;
    CurrencyType::parse(text).or_else(|| match text.trim() {
        "$" | "US$" => Some(CurrencyType::Usd),
        "€" => Some(CurrencyType::Eur),
        "£" => Some(CurrencyType::Gbp),
        "₹" => Some(CurrencyType::Inr),
        _ => None,
    })
}

fn line_items(items: &[OcrLineItem]) -> Result<Value> {
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let amount = amount(&item.amount, &format!("line_items[{}].amount", i))?;
        out.push(json!({
            "description": item.description,
            "quantity": item.quantity,
            "unit_price": item.unit_price,
            "amount": amount,
            "confidence": item.amount.confidence,
        }));
    }
    Ok(Value::Array(out))
}

fn field_confidence(ocr: &OcrResult) -> Value {
    let scores = [
        ("invoice_number", ocr.invoice_number.confidence),
        ("invoice_date", ocr.invoice_date.confidence),
        ("due_date", ocr.due_date.confidence),
        ("invoice_value", ocr.invoice_value.confidence),
        ("subtotal", ocr.subtotal.confidence),
        ("tax_amount", ocr.tax_amount.confidence),
        ("currency", ocr.currency.confidence),
        ("vendor_name", ocr.vendor_name.confidence),
        ("vendor_tax_id", ocr.vendor_tax_id.confidence),
        ("vendor_address", ocr.vendor_address.confidence),
        ("customer_name", ocr.customer_name.confidence),
        ("customer_address", ocr.customer_address.confidence),
    ];

    let map: Map<String, Value> = scores
        .into_iter()
        .filter_map(|(name, score)| score.map(|s| (name.to_string(), json!(s))))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use rust_decimal::prelude::FromPrimitive;

    fn file() -> FileMeta {
        FileMeta {
            path: "uploads/abc.pdf".to_string(),
            name: "invoice.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 2048,
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_empty_extraction_uses_sentinels() {
        let draft = map_to_invoice(&OcrResult::default(), "sec", file()).unwrap();

        assert_eq!(draft.invoice_number, PENDING);
        assert_eq!(draft.vendor_name, PENDING);
        assert_eq!(draft.vendor_tax_id, PENDING);
        assert!(draft.requires_review);
        assert_eq!(draft.status, InvoiceStatus::Submitted);
        assert_eq!(draft.invoice_value, None);
        assert_eq!(draft.currency, None);
        assert_eq!(draft.created_by, "sec");
        assert_eq!(draft.file, Some(file()));
    }

    #[test]
    fn test_blank_text_counts_as_missing() {
        let ocr = OcrResult {
            invoice_number: OcrField::typed("   ".to_string(), 0.4),
            vendor_name: OcrField::typed("Gulf Steel LLC".to_string(), 0.9),
            vendor_tax_id: OcrField::text(" 100234 ", 0.9),
            ..Default::default()
        };

        let draft = map_to_invoice(&ocr, "sec", file()).unwrap();
        assert_eq!(draft.invoice_number, PENDING);
        assert_eq!(draft.vendor_name, "Gulf Steel LLC");
        assert_eq!(draft.vendor_tax_id, "100234");
        assert!(draft.requires_review);
    }

    #[test]
    fn test_complete_extraction() {
        let ocr = OcrResult {
            invoice_number: OcrField::typed("INV-2026-001".to_string(), 0.99),
            invoice_date: OcrField::text("15/02/2026", 0.9),
            due_date: OcrField::typed(NaiveDate::from_ymd_opt(2026, 3, 17).unwrap(), 0.9),
            invoice_value: OcrField::text("AED 1,050.00", 0.95),
            subtotal: OcrField::typed(dec("1000.00"), 0.95),
            tax_amount: OcrField::text("50", 0.7),
            currency: OcrField::text("aed", 0.9),
            vendor_name: OcrField::typed("Gulf Steel LLC".to_string(), 0.98),
            vendor_tax_id: OcrField::typed("TRN-100234".to_string(), 0.88),
            confidence_score: Some(0.93),
            raw_text: Some("INVOICE ...".to_string()),
            ..Default::default()
        };

        let draft = map_to_invoice(&ocr, "sec", file()).unwrap();
        assert!(!draft.requires_review);
        assert_eq!(draft.invoice_date, NaiveDate::from_ymd_opt(2026, 2, 15));
        assert_eq!(draft.invoice_value, Some(dec("1050.00")));
        assert_eq!(draft.subtotal, Some(dec("1000.00")));
        assert_eq!(draft.tax_amount, Some(dec("50")));
        assert_eq!(draft.currency, Some(CurrencyType::Aed));
        assert_eq!(draft.confidence_score, Some(0.93));
        assert_eq!(draft.field_confidence["invoice_number"], json!(0.99));
        assert!(draft.field_confidence.get("customer_name").is_none());
        assert_eq!(draft.ocr_raw_text.as_deref(), Some("INVOICE ..."));
    }

    #[test]
    fn test_negative_value_is_rejected() {
        let ocr = OcrResult {
            invoice_value: OcrField::typed(Decimal::from_i32(-10).unwrap(), 0.9),
            ..Default::default()
        };
        let err = map_to_invoice(&ocr, "sec", file()).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { field: Some(ref f), .. } if f == "invoice_value"
        ));

        let ocr = OcrResult {
            tax_amount: OcrField::text("(12.00)", 0.9),
            ..Default::default()
        };
        assert!(map_to_invoice(&ocr, "sec", file()).is_err());
    }

    #[test]
    fn test_negative_line_item_is_rejected() {
        let ocr = OcrResult {
            line_items: vec![
                OcrLineItem {
                    description: Some("Rebar".to_string()),
                    amount: OcrField::typed(dec("200"), 0.9),
                    ..Default::default()
                },
                OcrLineItem {
                    description: Some("Credit".to_string()),
                    amount: OcrField::text("-20.00", 0.9),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let err = map_to_invoice(&ocr, "sec", file()).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { field: Some(ref f), .. } if f == "line_items[1].amount"
        ));
    }

    #[test]
    fn test_unknown_currency_is_none() {
        let ocr = OcrResult {
            currency: OcrField::text("JPY", 0.9),
            ..Default::default()
        };
        assert_eq!(map_to_invoice(&ocr, "sec", file()).unwrap().currency, None);

        let ocr = OcrResult {
            currency: OcrField::text("€", 0.9),
            ..Default::default()
        };
        assert_eq!(
            map_to_invoice(&ocr, "sec", file()).unwrap().currency,
            Some(CurrencyType::Eur)
        );
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("AED 1,250.00"), Some(dec("1250.00")));
        assert_eq!(parse_amount("$ 12,345,678.9"), Some(dec("12345678.9")));
        assert_eq!(parse_amount("-45.10 USD"), Some(dec("-45.10")));
        assert_eq!(parse_amount("(1,200.00)"), Some(dec("-1200.00")));
        assert_eq!(parse_amount("300"), Some(dec("300")));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_parse_amount_refuses_ambiguous_text() {
        assert_eq!(parse_amount("Total incl. 5% VAT: 1,050.00"), None);
        assert_eq!(parse_amount("1,050.00 / 50.00"), None);
        assert_eq!(parse_amount("Qty 3"), None);
        assert_eq!(parse_amount("12.50 kg"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_amount_currency_hyphen() {
        assert_eq!(parse_amount("AED-1,250.00"), Some(dec("1250.00")));
        assert_eq!(parse_amount("usd-99"), Some(dec("99")));
        assert_eq!(parse_amount("AED -1,250.00"), Some(dec("-1250.00")));
        assert_eq!(parse_amount("-AED 5.00"), Some(dec("-5.00")));
        assert_eq!(parse_amount("$-5"), Some(dec("-5")));
        assert_eq!(parse_amount("€ 1.234,5"), None);
    }

    #[test]
    fn test_ambiguous_total_stays_absent() {
        let ocr = OcrResult {
            invoice_value: OcrField::text("Total incl. 5% VAT: 1,050.00", 0.6),
            subtotal: OcrField::text("AED-1,000.00", 0.9),
            ..Default::default()
        };

        let draft = map_to_invoice(&ocr, "sec", file()).unwrap();
        assert_eq!(draft.invoice_value, None);
        assert_eq!(draft.subtotal, Some(dec("1000.00")));
    }

    #[test]
    fn test_unstorable_amounts_are_rejected() {
        let ocr = OcrResult {
            invoice_value: OcrField::text("12345678901234567890.123", 0.9),
            ..Default::default()
        };
        let err = map_to_invoice(&ocr, "sec", file()).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { field: Some(ref f), .. } if f == "invoice_value"
        ));

        let ocr = OcrResult {
            tax_amount: OcrField::typed(dec("52.505"), 0.9),
            ..Default::default()
        };
        let err = map_to_invoice(&ocr, "sec", file()).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { field: Some(ref f), .. } if f == "tax_amount"
        ));
    }
}

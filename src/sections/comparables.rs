//! Comparable evidence table for the valuation methodology section.

use serde_json::{Value, json};

use crate::input::model::{Comparable, PropertyData};

pub const SQFT_PER_SQM: f64 = 10.764;
pub const TABLE_ROWS: usize = 5;

pub const TABLE_HEADERS: [&str; 10] = [
    "Address",
    "Distance",
    "Type",
    "Tenure",
    "Beds",
    "Size (sqm)",
    "Price",
    "£/sqft",
    "Sale Date",
    "Key Differences",
];

pub fn format_distance(metres: f64) -> String {
    if metres < 1000.0 {
        format!("{metres:.0}m")
    } else {
        format!("{:.2}km", metres / 1000.0)
    }
}

pub fn property_type_name(code: &str) -> &'static str {
    match code.trim() {
        "F" => "Flat",
        "H" => "House",
        _ => "Unknown",
    }
}

pub fn tenure_name(code: &str) -> &'static str {
    match code.trim() {
        "F" => "Freehold",
        "L" => "Leasehold",
        _ => "Unknown",
    }
}

pub(crate) fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// "£1,250,000" or "£1,234.57"; "N/A" for non-positive amounts.
pub fn pounds(amount: f64, decimals: usize) -> String {
    if amount <= 0.0 || !amount.is_finite() {
        return "N/A".to_string();
    }
    let text = format!("{amount:.decimals$}");
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text.as_str(), None),
    };
    let whole = group_thousands(whole.parse().unwrap_or(0));
    match fraction {
        Some(fraction) => format!("£{whole}.{fraction}"),
        None => format!("£{whole}"),
    }
}

/// One comparable prepared for the prompt and the table.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparableRow {
    pub address: String,
    pub distance: String,
    pub property_type: &'static str,
    pub tenure: &'static str,
    pub bedrooms: f64,
    pub size_sqm: f64,
    pub size_sqft: f64,
    pub price: f64,
    pub price_per_sqft: f64,
    pub sale_date: String,
    pub key_differences: String,
}

impl ComparableRow {
    pub fn new(comp: &Comparable, subject: &PropertyData) -> Self {
        let size_sqft = comp.size_sqm * SQFT_PER_SQM;
        let price_per_sqft = if size_sqft > 0.0 {
            comp.price / size_sqft
        } else {
            0.0
        };
        let bedrooms = (comp.bedrooms * 10.0).round() / 10.0;
        Self {
            address: comp.address.trim().to_string(),
            distance: format_distance(comp.distance_m),
            property_type: property_type_name(&comp.property_type),
            tenure: tenure_name(&comp.tenure),
            bedrooms,
            size_sqm: comp.size_sqm,
            size_sqft,
            price: comp.price,
            price_per_sqft,
            sale_date: comp.sale_date.clone(),
            key_differences: format!(
                "Size: {:.0} sqm vs subject {:.0} sqm. Bedrooms: {} vs subject {}.",
                comp.size_sqm, subject.total_size_sqm, bedrooms, subject.number_of_bedrooms
            ),
        }
    }

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.address.clone(),
            self.distance.clone(),
            self.property_type.to_string(),
            self.tenure.to_string(),
            self.bedrooms.to_string(),
            format!("{:.0}", self.size_sqm),
            pounds(self.price, 0),
            pounds(self.price_per_sqft, 2),
            self.sale_date.clone(),
            self.key_differences.clone(),
        ]
    }

    pub fn to_prompt_json(&self) -> Value {
        json!({
            "address": self.address,
            "distance_from_subject": self.distance,
            "property_type": self.property_type,
            "tenure": self.tenure,
            "bedrooms": self.bedrooms,
            "size_sqm": self.size_sqm,
            "size_sqft": (self.size_sqft * 10.0).round() / 10.0,
            "price": self.price,
            "price_per_sqft": (self.price_per_sqft * 100.0).round() / 100.0,
            "sale_date": self.sale_date,
            "key_differences": self.key_differences,
        })
    }
}

/// The first five comparables, in input order.
pub fn rows(subject: &PropertyData) -> Vec<ComparableRow> {
    subject
        .correction_layer
        .knn_comparables
        .iter()
        .take(TABLE_ROWS)
        .map(|comp| ComparableRow::new(comp, subject))
        .collect()
}

/// `{headers, rows}` as written into the section payload.
pub fn table(rows: &[ComparableRow]) -> Value {
    json!({
        "headers": TABLE_HEADERS,
        "rows": rows.iter().map(ComparableRow::cells).collect::<Vec<_>>(),
    })
}

//! Category classification
//!
//! Scores brand signals on three independent axes and maps the best
//! combination onto the closed category set:
//!
//! | axis     | values                                     |
//! |----------|--------------------------------------------|
//! | reach    | local, regional, national                  |
//! | audience | b2b, b2c                                   |
//! | offering | service, agency, retail, software, product |
//!
//! Pure and deterministic. Signals that carry no evidence, or that tie
//! between categories, fall back to `NationalSaasB2b` at low confidence.

use tracing::debug;

use crate::models::{BrandSignals, Category};

/// Category used when signals are unknown or ambiguous
pub const FALLBACK_CATEGORY: Category = Category::NationalSaasB2b;

/// Confidence reported with the fallback category
pub const FALLBACK_CONFIDENCE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    Local,
    Regional,
    National,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    B2b,
    B2c,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offering {
    Service,
    Agency,
    Retail,
    Software,
    Product,
}

const LOCAL_TERMS: &[&str] = &[
    "local", "near me", "neighborhood", "neighbourhood", "city", "town", "on site", "onsite",
    "in home", "county", "downtown", "nearby", "walk in", "same day",
];
const REGIONAL_TERMS: &[&str] = &[
    "regional", "statewide", "state wide", "tri state", "multi location", "locations", "metro",
    "chain", "across the state", "province", "branches",
];
const NATIONAL_TERMS: &[&str] = &[
    "national", "nationwide", "global", "worldwide", "international", "online", "ships",
    "shipping", "ecommerce", "e commerce", "saas", "cloud", "remote",
];

const B2B_TERMS: &[&str] = &[
    "b2b", "businesses", "business", "enterprise", "companies", "teams", "smb", "procurement",
    "clients", "wholesale", "api", "crm", "workflow", "b2b saas", "organizations", "developers",
];
const B2C_TERMS: &[&str] = &[
    "b2c", "consumers", "consumer", "families", "homeowners", "shoppers", "personal",
    "individuals", "kids", "pets", "patients", "d2c", "dtc", "people", "moms", "parents",
];

const SERVICE_TERMS: &[&str] = &[
    "service", "services", "repair", "cleaning", "plumbing", "plumber", "landscaping", "clinic",
    "salon", "contractor", "installation", "dental", "dentist", "hvac", "law firm", "accounting",
    "bookkeeping", "it support", "maintenance", "spa", "fitness", "gym", "tutoring",
];
const AGENCY_TERMS: &[&str] = &[
    "agency", "marketing", "creative", "advertising", "seo", "consultancy", "consulting",
    "staffing", "branding", "design studio", "pr firm", "media buying",
];
const RETAIL_TERMS: &[&str] = &[
    "store", "stores", "shop", "boutique", "retail", "retailer", "outlet", "showroom", "grocery",
    "pharmacy", "furniture", "dealership",
];
const SOFTWARE_TERMS: &[&str] = &[
    "software", "saas", "platform", "app", "api", "cloud", "dashboard", "automation", "ai",
    "analytics", "chatbot", "sdk", "integration", "integrations",
];
const PRODUCT_TERMS: &[&str] = &[
    "product", "products", "apparel", "cosmetics", "skincare", "beverage", "snack", "snacks",
    "gadget", "device", "supplement", "supplements", "d2c", "dtc", "subscription box", "shoes",
];

/// Per-axis evidence gathered from signals
#[derive(Debug, Default, Clone)]
struct AxisScores {
    reach: [f64; 3],
    audience: [f64; 2],
    offering: [f64; 5],
}

impl AxisScores {
    fn total(&self) -> f64 {
        self.reach.iter().chain(&self.audience).chain(&self.offering).sum()
    }

    fn category_score(&self, category: Category) -> f64 {
        let (reach, audience, offering) = axes(category);
        self.reach[reach as usize] + self.audience[audience as usize] + self.offering[offering as usize]
    }
}

fn axes(category: Category) -> (Reach, Audience, Offering) {
    match category {
        Category::LocalServiceB2b => (Reach::Local, Audience::B2b, Offering::Service),
        Category::LocalServiceB2c => (Reach::Local, Audience::B2c, Offering::Service),
        Category::RegionalAgencyB2b => (Reach::Regional, Audience::B2b, Offering::Agency),
        Category::RegionalRetailB2c => (Reach::Regional, Audience::B2c, Offering::Retail),
        Category::NationalSaasB2b => (Reach::National, Audience::B2b, Offering::Software),
        Category::NationalProductB2c => (Reach::National, Audience::B2c, Offering::Product),
    }
}

/// Lower-case the text and collapse every non-alphanumeric run to one
/// space, padded so whole-phrase matching can use `" term "`.
fn normalize_text(parts: &[&str]) -> String {
    let mut out = String::from(" ");
    for part in parts {
        let mut last_space = true;
        for ch in part.chars() {
            if ch.is_alphanumeric() {
                out.extend(ch.to_lowercase());
                last_space = false;
            } else if !last_space {
                out.push(' ');
                last_space = true;
            }
        }
        if !last_space {
            out.push(' ');
        }
    }
    out
}

fn count_terms(text: &str, terms: &[&str]) -> f64 {
    terms
        .iter()
        .filter(|term| text.contains(&format!(" {} ", term)))
        .count() as f64
}

fn score(signals: &BrandSignals) -> AxisScores {
    let mut parts: Vec<&str> = vec![signals.description.as_str()];
    parts.extend(signals.keywords.iter().map(String::as_str));
    let text = normalize_text(&parts);

    let mut scores = AxisScores {
        reach: [
            count_terms(&text, LOCAL_TERMS),
            count_terms(&text, REGIONAL_TERMS),
            count_terms(&text, NATIONAL_TERMS),
        ],
        audience: [count_terms(&text, B2B_TERMS), count_terms(&text, B2C_TERMS)],
        offering: [
            count_terms(&text, SERVICE_TERMS),
            count_terms(&text, AGENCY_TERMS),
            count_terms(&text, RETAIL_TERMS),
            count_terms(&text, SOFTWARE_TERMS),
            count_terms(&text, PRODUCT_TERMS),
        ],
    };

    // Structural hints weigh more than a single keyword
    match signals.location_count {
        Some(1) => scores.reach[Reach::Local as usize] += 1.5,
        Some(2..=15) => scores.reach[Reach::Regional as usize] += 1.5,
        Some(n) if n > 15 => scores.reach[Reach::National as usize] += 1.0,
        _ => {}
    }

    match signals.service_radius_km {
        Some(r) if r.is_finite() && r > 0.0 && r <= 50.0 => scores.reach[Reach::Local as usize] += 1.5,
        Some(r) if r.is_finite() && r > 50.0 && r <= 500.0 => {
            scores.reach[Reach::Regional as usize] += 1.5
        }
        Some(r) if r > 500.0 => scores.reach[Reach::National as usize] += 1.5,
        _ => {}
    }

    let hints = normalize_text(&signals.audience_hints.iter().map(String::as_str).collect::<Vec<_>>());
    scores.audience[Audience::B2b as usize] += 2.0 * count_terms(&hints, B2B_TERMS);
    scores.audience[Audience::B2c as usize] += 2.0 * count_terms(&hints, B2C_TERMS);

    scores
}

/// Classify a brand into one category with a confidence in [0, 1]
pub fn classify(signals: &BrandSignals) -> (Category, f64) {
    let scores = score(signals);
    let evidence = scores.total();

    if evidence <= 0.0 {
        debug!("No classification evidence, using fallback category");
        return (FALLBACK_CATEGORY, FALLBACK_CONFIDENCE);
    }

    let mut ranked: Vec<(Category, f64)> = Category::ALL
        .into_iter()
        .map(|c| (c, scores.category_score(c)))
        .collect();
    // Stable sort keeps enum order among equal scores
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (best, best_score) = ranked[0];
    let second_score = ranked[1].1;

    if best_score <= 0.0 || (best_score - second_score).abs() < f64::EPSILON {
        debug!(best = %best, best_score, second_score, "Ambiguous classification, using fallback category");
        return (FALLBACK_CATEGORY, FALLBACK_CONFIDENCE);
    }

    let margin = (best_score - second_score) / best_score;
    let strength = (best_score / 6.0).min(1.0);
    let confidence = (0.3 + 0.65 * (0.5 * margin + 0.5 * strength)).min(0.95);

    debug!(category = %best, confidence, evidence, "Classified brand");
    (best, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(description: &str) -> BrandSignals {
        BrandSignals {
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_signals_fall_back() {
        let (category, confidence) = classify(&BrandSignals::default());
        assert_eq!(category, Category::NationalSaasB2b);
        assert!(confidence <= 0.25);
    }

    #[test]
    fn test_saas_platform() {
        let (category, confidence) = classify(&signals(
            "Cloud platform with an API that helps enterprise teams automate workflow for businesses nationwide",
        ));
        assert_eq!(category, Category::NationalSaasB2b);
        assert!(confidence > 0.25);
    }

    #[test]
    fn test_local_consumer_service() {
        let s = BrandSignals {
            description: "Family owned plumbing repair for homeowners, same day service".to_string(),
            location_count: Some(1),
            service_radius_km: Some(30.0),
            ..Default::default()
        };
        assert_eq!(classify(&s).0, Category::LocalServiceB2c);
    }

    #[test]
    fn test_regional_retail() {
        let s = BrandSignals {
            description: "Furniture store chain with a showroom in every metro".to_string(),
            location_count: Some(6),
            audience_hints: vec!["consumers".to_string()],
            ..Default::default()
        };
        assert_eq!(classify(&s).0, Category::RegionalRetailB2c);
    }

    #[test]
    fn test_dtc_product() {
        let s = BrandSignals {
            description: "DTC skincare products shipping nationwide to consumers".to_string(),
            ..Default::default()
        };
        assert_eq!(classify(&s).0, Category::NationalProductB2c);
    }

    #[test]
    fn test_deterministic() {
        let s = signals("Regional marketing agency for companies, SEO and branding");
        assert_eq!(classify(&s), classify(&s));
        assert_eq!(classify(&s).0, Category::RegionalAgencyB2b);
    }

    #[test]
    fn test_confidence_in_range() {
        for text in ["software", "store shop retail consumers metro", "xyz", "clinic local"] {
            let (_, confidence) = classify(&signals(text));
            assert!((0.0..=1.0).contains(&confidence));
        }
    }
}

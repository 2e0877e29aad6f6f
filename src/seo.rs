//! JSON-LD structured data for the marketing site.

use serde_json::{json, Value};

use crate::db::Package;

/// Describes the academy as a schema.org `EducationalOrganization` whose
/// catalog lists the active credit packages as offers.
pub fn structured_data(site_name: &str, public_url: &str, packages: &[Package]) -> Value {
    let base = public_url.trim_end_matches('/');

    let offers: Vec<Value> = packages
        .iter()
        .filter(|p| p.is_active())
        .map(|p| {
            json!({
                "@type": "Offer",
                "name": p.name,
                "description": p.description,
                "price": format!("{:.2}", p.price),
                "priceCurrency": p.currency,
                "availability": "https://schema.org/InStock",
                "url": format!("{}/packages/{}", base, p.id),
                "eligibleQuantity": {
                    "@type": "QuantitativeValue",
                    "value": p.credits,
                    "unitText": "credit"
                }
            })
        })
        .collect();

    let mut org = json!({
        "@context": "https://schema.org",
        "@type": "EducationalOrganization",
        "name": site_name,
        "url": base,
        "logo": format!("{}/logo.png", base),
        "inLanguage": ["ar", "en"],
        "description": "منصة تعليمية ثنائية اللغة لدروس خصوصية مباشرة عبر الإنترنت",
        "availableLanguage": [
            { "@type": "Language", "name": "Arabic", "alternateName": "ar" },
            { "@type": "Language", "name": "English", "alternateName": "en" }
        ]
    });

    if !offers.is_empty() {
        org["hasOfferCatalog"] = json!({
            "@type": "OfferCatalog",
            "name": "باقات الحصص",
            "itemListElement": offers
        });
    }

    org
}

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sitescout_core::entity::{DraftEntity, ProductRecord};
use sitescout_core::error::ExtractError;
use sitescout_core::model::ExtractOptions;
use sitescout_core::traits::{Extractor, PageExtract};
use url::Url;

/// Candidate links returned per page; the orchestrator applies its own
/// page budget on top of this.
const MAX_CANDIDATE_LINKS: usize = 30;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("static email regex is valid")
});

static PHONE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // International: +49 30 1234567, +1-555-123-4567
        r"\+\d{1,3}[\s.-]?\(?\d{1,4}\)?[\s.-]?\d{1,4}[\s.-]?\d{1,9}",
        // US: (555) 123-4567
        r"\(\d{3}\)[\s.-]?\d{3}[\s.-]?\d{4}",
        // Plain: 555-123-4567
        r"\b\d{3}[\s.-]\d{3}[\s.-]\d{4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static phone regex is valid"))
    .collect()
});

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[$€£]|USD|EUR|GBP)\s?\d+(?:[.,]\d{1,2})?")
        .expect("static price regex is valid")
});

static PRODUCT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/p/|/product/|/item/|/prod[_-]?id/|/sku/|/id/\d+")
        .expect("static product id regex is valid")
});

/// Keyword table mapping page vocabulary to an industry label. First
/// match wins, so more specific entries come last only if their
/// vocabulary never collides with earlier ones.
static INDUSTRY_KEYWORDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\b(?:tofu|vegan|plant-based|vegetarian|organic food)\b",
            "Plant-based Foods",
        ),
        (
            r"(?i)\b(?:food|restaurant|catering|bakery|café)\b",
            "Food & Beverage",
        ),
        (
            r"(?i)\b(?:tech|software|application|app|digital|IT|information technology)\b",
            "Technology",
        ),
        (
            r"(?i)\b(?:manufacturing|factory|production|industrial)\b",
            "Manufacturing",
        ),
        (
            r"(?i)\b(?:retail|shop|store|e-commerce|marketplace)\b",
            "Retail",
        ),
        (
            r"(?i)\b(?:healthcare|medical|hospital|clinic|pharma|health)\b",
            "Healthcare",
        ),
        (
            r"(?i)\b(?:financial|bank|insurance|investment|finance)\b",
            "Financial Services",
        ),
    ]
    .iter()
    .map(|(p, label)| (Regex::new(p).expect("static industry regex is valid"), *label))
    .collect()
});

const EMAIL_FALSE_POSITIVES: &[&str] = &[
    "example@example.com",
    "user@example.com",
    "name@example.com",
];

const EXCLUDED_PATHS: &[&str] = &[
    "about", "contact", "privacy", "terms", "faq", "help", "support", "blog", "news", "login",
    "register", "account", "cart", "checkout", "search", "sitemap", "careers", "jobs", "press",
    "media",
];

const PRODUCT_URL_TERMS: &[&str] = &[
    "product",
    "item",
    "shop",
    "buy",
    "purchase",
    "catalog",
    "catalogue",
    "collection",
    "goods",
    "merchandise",
    "sale",
    "order",
    "category",
];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selector is valid")
}

/// Heuristic HTML extractor.
///
/// Deterministic per contract: same HTML and base URL always produce the
/// same draft. Pulls structured data from JSON-LD first, then falls back
/// to meta tags, regexes, and product-card heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for HtmlExtractor {
    fn extract(
        &self,
        html: &str,
        base_url: &str,
        options: &ExtractOptions,
    ) -> Result<PageExtract, ExtractError> {
        if html.trim().is_empty() {
            return Err(ExtractError::Parsing("empty document".into()));
        }
        let base = Url::parse(base_url)
            .map_err(|e| ExtractError::InvalidUrl(format!("{base_url}: {e}")))?;

        let doc = Html::parse_document(html);
        let text = page_text(&doc);

        let mut entity = DraftEntity::new();
        apply_json_ld(&doc, base_url, options, &mut entity);
        extract_company(&doc, &text, &mut entity);

        if options.extract_contact {
            extract_contacts(&doc, &text, &mut entity);
        }

        let mut candidate_links = Vec::new();
        if options.extract_products {
            extract_product_cards(&doc, base_url, &mut entity);
            candidate_links = collect_candidate_links(&doc, &base);
        }

        Ok(PageExtract {
            entity,
            candidate_links,
        })
    }
}

fn page_text(doc: &Html) -> String {
    doc.root_element().text().collect::<Vec<_>>().join(" ")
}

fn meta_content<'a>(doc: &'a Html, css: &str) -> Option<&'a str> {
    doc.select(&selector(css))
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

// ---------------------------------------------------------------------------
// JSON-LD
// ---------------------------------------------------------------------------

/// Walk every `application/ld+json` block, harvesting Organization and
/// Product nodes. Malformed JSON is skipped; structured data on real
/// sites is unreliable enough that it never fails the parse.
fn apply_json_ld(doc: &Html, base_url: &str, options: &ExtractOptions, entity: &mut DraftEntity) {
    for script in doc.select(&selector(r#"script[type="application/ld+json"]"#)) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        apply_json_ld_node(&value, base_url, options, entity);
    }
}

fn apply_json_ld_node(
    value: &serde_json::Value,
    base_url: &str,
    options: &ExtractOptions,
    entity: &mut DraftEntity,
) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                apply_json_ld_node(item, base_url, options, entity);
            }
        }
        serde_json::Value::Object(obj) => {
            if let Some(graph) = obj.get("@graph") {
                apply_json_ld_node(graph, base_url, options, entity);
            }
            match obj.get("@type").and_then(|t| t.as_str()) {
                Some("Organization") | Some("LocalBusiness") | Some("Corporation") => {
                    if entity.company_name.is_none() {
                        entity.company_name = str_field(obj, "name");
                    }
                    if entity.description.is_none() {
                        entity.description = str_field(obj, "description");
                    }
                    if options.extract_contact {
                        if let Some(email) = str_field(obj, "email") {
                            entity.add_email(email.trim_start_matches("mailto:").to_string());
                        }
                        if let Some(phone) = str_field(obj, "telephone") {
                            entity.add_phone(phone);
                        }
                    }
                }
                Some("Product") if options.extract_products => {
                    if let Some(name) = str_field(obj, "name") {
                        let mut product = ProductRecord::new(name, base_url);
                        if let Some(offers) = obj.get("offers") {
                            product.price = offers
                                .get("price")
                                .map(|p| match p {
                                    serde_json::Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .filter(|p| !p.is_empty());
                        }
                        product.category = str_field(obj, "category");
                        entity.add_product(product);
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
}

fn str_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Company heuristics
// ---------------------------------------------------------------------------

fn extract_company(doc: &Html, text: &str, entity: &mut DraftEntity) {
    if entity.company_name.is_none() {
        entity.company_name = meta_content(doc, r#"meta[property="og:site_name"]"#)
            .map(String::from)
            .or_else(|| {
                doc.select(&selector("title"))
                    .next()
                    .map(|t| clean_title(&t.text().collect::<String>()))
                    .filter(|t| !t.is_empty())
            });
    }

    let meta_description = meta_content(doc, r#"meta[name="description"]"#);
    let og_description = meta_content(doc, r#"meta[property="og:description"]"#);
    for candidate in [meta_description, og_description].into_iter().flatten() {
        // Keep the longest description seen so far.
        if entity
            .description
            .as_ref()
            .is_none_or(|d| d.len() < candidate.len())
        {
            entity.description = Some(candidate.to_string());
        }
    }

    if entity.company_type.is_none() {
        let haystack = entity.description.as_deref().unwrap_or(text);
        entity.company_type = classify_industry(haystack);
    }
}

/// Strip the tagline from a `<title>`: "Acme Foods | Vegan since 1982"
/// becomes "Acme Foods".
fn clean_title(title: &str) -> String {
    let title = title.trim();
    for sep in [" | ", " - ", " – ", " :: "] {
        if let Some((head, _)) = title.split_once(sep) {
            return head.trim().to_string();
        }
    }
    title.to_string()
}

fn classify_industry(text: &str) -> Option<String> {
    INDUSTRY_KEYWORDS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, label)| (*label).to_string())
}

// ---------------------------------------------------------------------------
// Contact heuristics
// ---------------------------------------------------------------------------

fn extract_contacts(doc: &Html, text: &str, entity: &mut DraftEntity) {
    for link in doc.select(&selector(r#"a[href^="mailto:"]"#)) {
        if let Some(href) = link.value().attr("href") {
            let email = href.trim_start_matches("mailto:");
            let email = email.split('?').next().unwrap_or(email);
            if EMAIL_RE.is_match(email) && !is_email_false_positive(email) {
                entity.add_email(email.to_string());
            }
        }
    }
    for link in doc.select(&selector(r#"a[href^="tel:"]"#)) {
        if let Some(href) = link.value().attr("href") {
            let phone = href.trim_start_matches("tel:").trim();
            if !phone.is_empty() {
                entity.add_phone(phone.to_string());
            }
        }
    }

    for m in EMAIL_RE.find_iter(text) {
        if !is_email_false_positive(m.as_str()) {
            entity.add_email(m.as_str().to_string());
        }
    }
    for re in PHONE_RES.iter() {
        for m in re.find_iter(text) {
            entity.add_phone(m.as_str().trim().to_string());
        }
    }

    for address in doc.select(&selector("address")) {
        let line = address
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !line.is_empty() {
            entity.add_address(line);
        }
    }
}

fn is_email_false_positive(email: &str) -> bool {
    let lower = email.to_lowercase();
    EMAIL_FALSE_POSITIVES.contains(&lower.as_str())
        // Asset filenames like sprite@2x.png match the email shape.
        || [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"]
            .iter()
            .any(|ext| lower.ends_with(ext))
}

// ---------------------------------------------------------------------------
// Product heuristics
// ---------------------------------------------------------------------------

/// Pull products out of listing cards: elements whose class or id
/// mentions "product" or "item", with a heading for the name and an
/// optional price in the card text.
fn extract_product_cards(doc: &Html, base_url: &str, entity: &mut DraftEntity) {
    let cards = selector(
        r#"div[class*="product"], li[class*="product"], article[class*="product"],
           section[class*="product"], div[class*="item-card"], li[class*="item-card"]"#,
    );
    let heading = selector("h1, h2, h3, h4, .name, .title");

    for card in doc.select(&cards) {
        let Some(name) = card
            .select(&heading)
            .next()
            .map(|h| h.text().collect::<String>())
            .map(|n| n.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|n| !n.is_empty() && n.len() < 120)
        else {
            continue;
        };

        let card_text = card.text().collect::<Vec<_>>().join(" ");
        let mut product = ProductRecord::new(name, base_url);
        product.price = PRICE_RE.find(&card_text).map(|m| m.as_str().to_string());
        entity.add_product(product);
    }
}

/// Same-domain links worth a nested fetch, in document order, deduplicated,
/// capped at [`MAX_CANDIDATE_LINKS`].
fn collect_candidate_links(doc: &Html, base: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for anchor in doc.select(&selector("a[href]")) {
        if links.len() >= MAX_CANDIDATE_LINKS {
            break;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.is_empty()
            || href == "#"
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let href_lower = href.to_lowercase();
        if ["login", "cart", "account", "contact"]
            .iter()
            .any(|term| href_lower.contains(term))
        {
            continue;
        }

        let text = link_text(&anchor);
        if text.is_empty() {
            continue;
        }

        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if !same_domain(&resolved, base)
            || is_excluded_path(&resolved)
            || !is_likely_product_link(&resolved, &text)
        {
            continue;
        }

        let resolved = resolved.to_string();
        if !links.contains(&resolved) {
            links.push(resolved);
        }
    }

    links
}

fn link_text(anchor: &ElementRef<'_>) -> String {
    anchor
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Domain equality ignoring a `www.` prefix on either side.
fn same_domain(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(a), Some(b)) => {
            a.trim_start_matches("www.") == b.trim_start_matches("www.")
        }
        _ => false,
    }
}

fn is_excluded_path(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    EXCLUDED_PATHS.iter().any(|excluded| {
        path == format!("/{excluded}")
            || path == format!("/{excluded}/")
            || path.contains(&format!("/{excluded}/"))
    })
}

fn is_likely_product_link(url: &Url, text: &str) -> bool {
    let url_lower = url.as_str().to_lowercase();
    let path_lower = url.path().to_lowercase();

    let has_product_term = PRODUCT_URL_TERMS
        .iter()
        .any(|term| url_lower.contains(term) || path_lower.contains(term));
    let has_product_id = PRODUCT_ID_RE.is_match(&path_lower);

    let text_lower = text.to_lowercase();
    let has_product_indicator = ["buy", "shop", "view", "details", "more"]
        .iter()
        .any(|w| text_lower.contains(w));

    // Short non-navigational text is usually a product name.
    let is_concise_name = text.len() < 50
        && !text_lower.contains("about")
        && !text_lower.contains("contact")
        && !text_lower.contains("home");

    has_product_term || has_product_id || has_product_indicator || is_concise_name
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPANY_PAGE: &str = r#"
        <html>
          <head>
            <title>Acme Foods | Plant-based since 1982</title>
            <meta name="description" content="Acme Foods makes vegan tofu products.">
            <meta property="og:description"
                  content="Acme Foods makes vegan tofu products for retailers across Europe.">
          </head>
          <body>
            <p>Reach us at <a href="mailto:info@acme.test?subject=hi">info@acme.test</a>
               or call <a href="tel:+31 20 123 4567">+31 20 123 4567</a>.</p>
            <address>Canal Street 1, Amsterdam</address>
            <div class="product-card"><h3>Tofu Block</h3><span>€3.50</span>
              <a href="/products/tofu-block">View details</a></div>
            <div class="product-card"><h3>Soy Milk</h3>
              <a href="/products/soy-milk">Soy Milk</a></div>
            <a href="/about/">About us</a>
            <a href="/cart">Cart</a>
            <a href="https://other.test/products/x">Partner product</a>
          </body>
        </html>"#;

    fn extract(html: &str) -> PageExtract {
        HtmlExtractor::new()
            .extract(html, "https://www.acme.test/", &ExtractOptions::default())
            .unwrap()
    }

    #[test]
    fn company_fields_from_title_and_meta() {
        let out = extract(COMPANY_PAGE);
        assert_eq!(out.entity.company_name.as_deref(), Some("Acme Foods"));
        // The longer og:description wins.
        assert!(
            out.entity
                .description
                .as_deref()
                .unwrap()
                .contains("retailers across Europe")
        );
        assert_eq!(
            out.entity.company_type.as_deref(),
            Some("Plant-based Foods")
        );
    }

    #[test]
    fn contacts_from_links_and_text() {
        let out = extract(COMPANY_PAGE);
        assert_eq!(out.entity.emails, vec!["info@acme.test"]);
        assert!(out.entity.phones.iter().any(|p| p.contains("123 4567")));
        assert_eq!(out.entity.addresses, vec!["Canal Street 1, Amsterdam"]);
    }

    #[test]
    fn products_from_cards_with_prices() {
        let out = extract(COMPANY_PAGE);
        let names: Vec<_> = out.entity.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Tofu Block", "Soy Milk"]);
        assert_eq!(out.entity.products[0].price.as_deref(), Some("€3.50"));
        assert_eq!(out.entity.products[1].price, None);
    }

    #[test]
    fn candidate_links_stay_in_domain_and_skip_noise() {
        let out = extract(COMPANY_PAGE);
        assert_eq!(
            out.candidate_links,
            vec![
                "https://www.acme.test/products/tofu-block".to_string(),
                "https://www.acme.test/products/soy-milk".to_string(),
            ]
        );
    }

    #[test]
    fn json_ld_organization_and_product() {
        let html = r#"
            <html><head>
              <script type="application/ld+json">
              {"@context":"https://schema.org","@graph":[
                {"@type":"Organization","name":"Acme Foods BV",
                 "description":"Family-owned tofu maker",
                 "email":"mailto:sales@acme.test","telephone":"+31 20 765 4321"},
                {"@type":"Product","name":"Tempeh Strips",
                 "category":"Plant-based","offers":{"price":"4.20"}}
              ]}
              </script>
            </head><body><p>hello</p></body></html>"#;
        let out = extract(html);
        assert_eq!(out.entity.company_name.as_deref(), Some("Acme Foods BV"));
        assert_eq!(out.entity.emails, vec!["sales@acme.test"]);
        assert_eq!(out.entity.products.len(), 1);
        assert_eq!(out.entity.products[0].category.as_deref(), Some("Plant-based"));
        assert_eq!(out.entity.products[0].price.as_deref(), Some("4.20"));
    }

    #[test]
    fn malformed_json_ld_is_ignored() {
        let html = r#"
            <html><head>
              <title>Acme</title>
              <script type="application/ld+json">{not json</script>
            </head><body></body></html>"#;
        let out = extract(html);
        assert_eq!(out.entity.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn empty_document_is_a_parse_error() {
        let err = HtmlExtractor::new()
            .extract("   \n ", "https://acme.test/", &ExtractOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Parsing(_)));
    }

    #[test]
    fn options_gate_contact_and_product_extraction() {
        let out = HtmlExtractor::new()
            .extract(
                COMPANY_PAGE,
                "https://www.acme.test/",
                &ExtractOptions {
                    extract_contact: false,
                    extract_products: false,
                    use_ai: false,
                },
            )
            .unwrap();
        assert!(out.entity.emails.is_empty());
        assert!(out.entity.products.is_empty());
        assert!(out.candidate_links.is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = extract(COMPANY_PAGE);
        let b = extract(COMPANY_PAGE);
        assert_eq!(a.entity, b.entity);
        assert_eq!(a.candidate_links, b.candidate_links);
    }

    #[test]
    fn email_false_positives_are_filtered() {
        assert!(is_email_false_positive("example@example.com"));
        assert!(is_email_false_positive("sprite@2x.png"));
        assert!(!is_email_false_positive("info@acme.test"));
    }

    #[test]
    fn industry_classification_first_match_wins() {
        assert_eq!(
            classify_industry("We sell vegan tofu").as_deref(),
            Some("Plant-based Foods")
        );
        assert_eq!(
            classify_industry("Enterprise software platform").as_deref(),
            Some("Technology")
        );
        assert_eq!(classify_industry("nothing relevant here"), None);
    }

    #[test]
    fn excluded_paths_and_domains() {
        let base = Url::parse("https://acme.test/").unwrap();
        assert!(is_excluded_path(&base.join("/cart").unwrap()));
        assert!(is_excluded_path(&base.join("/help/billing").unwrap()));
        assert!(!is_excluded_path(&base.join("/products/tofu").unwrap()));

        let www = Url::parse("https://www.acme.test/x").unwrap();
        assert!(same_domain(&www, &base));
        let other = Url::parse("https://other.test/x").unwrap();
        assert!(!same_domain(&other, &base));
    }

    #[test]
    fn title_cleanup() {
        assert_eq!(clean_title("Acme Foods | Vegan since 1982"), "Acme Foods");
        assert_eq!(clean_title("Acme Foods - Home"), "Acme Foods");
        assert_eq!(clean_title("  Acme Foods  "), "Acme Foods");
    }
}

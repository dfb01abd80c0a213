use serde::{Deserialize, Serialize};

/// A product found on a page. Identity is the `(name, source_url)` pair;
/// re-adding the same product merges missing fields instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub price: Option<String>,
    pub category: Option<String>,
    pub source_url: String,
}

impl ProductRecord {
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price: None,
            category: None,
            source_url: source_url.into(),
        }
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// The in-progress structured record assembled for one URL.
///
/// Fields are filled incrementally by the extractor heuristics and the
/// enricher. `None` means "never seen", while an empty collection means
/// "looked and found nothing" — the validation stage needs the distinction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftEntity {
    pub company_name: Option<String>,
    pub company_type: Option<String>,
    pub description: Option<String>,
    /// Deduplicated case-insensitively, original casing preserved.
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub addresses: Vec<String>,
    pub products: Vec<ProductRecord>,
}

impl DraftEntity {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no heuristic produced anything at all.
    pub fn is_empty(&self) -> bool {
        self.company_name.is_none()
            && self.company_type.is_none()
            && self.description.is_none()
            && self.emails.is_empty()
            && self.phones.is_empty()
            && self.addresses.is_empty()
            && self.products.is_empty()
    }

    pub fn has_contact(&self) -> bool {
        !self.emails.is_empty() || !self.phones.is_empty()
    }

    pub fn add_email(&mut self, email: impl Into<String>) {
        let email = email.into();
        if !self
            .emails
            .iter()
            .any(|e| e.eq_ignore_ascii_case(&email))
        {
            self.emails.push(email);
        }
    }

    pub fn add_phone(&mut self, phone: impl Into<String>) {
        let phone = phone.into();
        if !self
            .phones
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&phone))
        {
            self.phones.push(phone);
        }
    }

    pub fn add_address(&mut self, address: impl Into<String>) {
        let address = address.into();
        if !self
            .addresses
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&address))
        {
            self.addresses.push(address);
        }
    }

    /// Add a product, merging by `(name, source_url)` identity. An existing
    /// product only gains fields it was missing.
    pub fn add_product(&mut self, product: ProductRecord) {
        if let Some(existing) = self
            .products
            .iter_mut()
            .find(|p| p.name == product.name && p.source_url == product.source_url)
        {
            if existing.price.is_none() {
                existing.price = product.price;
            }
            if existing.category.is_none() {
                existing.category = product.category;
            }
        } else {
            self.products.push(product);
        }
    }

    /// Fold findings from a nested page into this root draft. Scalar fields
    /// are gap-filled only; collections go through the dedupe/merge paths.
    pub fn merge(&mut self, other: DraftEntity) {
        if self.company_name.is_none() {
            self.company_name = other.company_name;
        }
        if self.company_type.is_none() {
            self.company_type = other.company_type;
        }
        if self.description.is_none() {
            self.description = other.description;
        }
        for email in other.emails {
            self.add_email(email);
        }
        for phone in other.phones {
            self.add_phone(phone);
        }
        for address in other.addresses {
            self.add_address(address);
        }
        for product in other.products {
            self.add_product(product);
        }
    }
}

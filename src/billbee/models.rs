//! Wire shapes of the marketplace REST API. Field names are PascalCase on the wire.

use serde::{Deserialize, Serialize};

/// `Type` discriminator of a stockable single article.
pub const PRODUCT_TYPE_COMPONENT: i32 = 1;
/// `Type` discriminator of an assembly that carries a bill of materials.
pub const PRODUCT_TYPE_ASSEMBLY: i32 = 2;

/// Generic response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub paging: Option<Paging>,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Paging {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TranslatedText {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lang_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Category {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StockBucket {
    #[serde(default)]
    pub stock_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stock_current: Option<f64>,
}

/// One bill-of-materials line of an assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BomLine {
    #[serde(default)]
    pub article_id: Option<i64>,
    #[serde(rename = "SKU", default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Catalog entry as returned by `GET /products`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Product {
    pub id: i64,
    #[serde(rename = "SKU", default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: Option<Vec<TranslatedText>>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub category1: Option<Category>,
    #[serde(default)]
    pub category2: Option<Category>,
    #[serde(default)]
    pub category3: Option<Category>,
    #[serde(default)]
    pub cost_price_net: Option<f64>,
    #[serde(default)]
    pub stock_current: Option<f64>,
    #[serde(default)]
    pub stocks: Option<Vec<StockBucket>>,
    #[serde(rename = "Type", default)]
    pub product_type: Option<i32>,
    #[serde(default)]
    pub bill_of_material: Option<Vec<BomLine>>,
    #[serde(default)]
    pub is_deactivated: Option<bool>,
    #[serde(default)]
    pub sold_amount: Option<f64>,
    #[serde(default)]
    pub stock_reserved_amount: Option<f64>,
}

impl Product {
    pub fn is_deactivated(&self) -> bool {
        self.is_deactivated.unwrap_or(false)
    }

    pub fn is_component(&self) -> bool {
        self.product_type == Some(PRODUCT_TYPE_COMPONENT)
    }

    pub fn is_assembly(&self) -> bool {
        self.product_type == Some(PRODUCT_TYPE_ASSEMBLY)
    }

    /// German title when present, otherwise the first non-empty one.
    pub fn display_name(&self) -> Option<String> {
        let titles = self.title.as_deref()?;
        let text = |t: &TranslatedText| {
            t.text
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        titles
            .iter()
            .find(|t| t.lang_code.as_deref() == Some("de"))
            .and_then(text)
            .or_else(|| titles.iter().find_map(text))
    }

    /// Category names in priority order.
    pub fn category_names(&self) -> [Option<&str>; 3] {
        [
            self.category1.as_ref().and_then(|c| c.name.as_deref()),
            self.category2.as_ref().and_then(|c| c.name.as_deref()),
            self.category3.as_ref().and_then(|c| c.name.as_deref()),
        ]
    }

    fn bucket(&self, index: usize) -> Option<f64> {
        self.stocks
            .as_deref()
            .and_then(|s| s.get(index))
            .and_then(|b| b.stock_current)
    }

    /// Sellable stock: the primary bucket.
    pub fn stock_available(&self) -> f64 {
        self.bucket(0).unwrap_or(0.0)
    }

    /// Damaged and display stock: every bucket after the primary one.
    pub fn stock_unavailable(&self) -> f64 {
        self.stocks
            .as_deref()
            .map(|s| s.iter().skip(1).filter_map(|b| b.stock_current).sum())
            .unwrap_or(0.0)
    }

    /// Current stock from the single-product endpoint.
    pub fn current_stock(&self) -> Option<f64> {
        self.stock_current.or_else(|| self.bucket(0))
    }

    pub fn bom_lines(&self) -> &[BomLine] {
        self.bill_of_material.as_deref().unwrap_or(&[])
    }
}

/// Catalog entry that did not decode into a [`Product`].
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedProduct {
    /// `Id` of the raw item, when it has a numeric one
    pub id: Option<i64>,
    pub error: String,
}

/// One page of the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPage {
    pub items: Vec<Product>,
    /// Items of this page that were dropped while decoding
    pub malformed: Vec<MalformedProduct>,
    pub page: u32,
    pub total_pages: u32,
}

impl ProductPage {
    /// Items the API returned, decodable or not.
    pub fn returned(&self) -> usize {
        self.items.len() + self.malformed.len()
    }
}

/// Decodes catalog items one by one so a bad item cannot sink its page.
pub fn decode_products(raw: Vec<serde_json::Value>) -> (Vec<Product>, Vec<MalformedProduct>) {
    let mut items = Vec::with_capacity(raw.len());
    let mut malformed = Vec::new();
    for value in raw {
        let id = value.get("Id").and_then(serde_json::Value::as_i64);
        match serde_json::from_value::<Product>(value) {
            Ok(product) => items.push(product),
            Err(e) => malformed.push(MalformedProduct {
                id,
                error: e.to_string(),
            }),
        }
    }
    (items, malformed)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReservedAmount {
    #[serde(default)]
    pub reserved_amount: Option<f64>,
}

/// Absolute stock write for one product. `Amount` is the new quantity, not a delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StockUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_id: Option<i64>,
}

impl StockUpdate {
    pub fn for_product(product_id: i64, amount: f64) -> Self {
        Self {
            product_id: Some(product_id),
            amount,
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StockUpdateMultiple {
    pub products: Vec<StockUpdate>,
}

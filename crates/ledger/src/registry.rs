//! Category registry.
//!
//! Resolves category names to display metadata. Stored category documents
//! were written by several generations of tooling, so `category_order` shows
//! up as an integer, a float, a numeric string or a boxed number. Decoding
//! tries each representation in a fixed priority order; a document that fits
//! none of them is skipped and counted, never fatal for its siblings.

use std::cmp::Ordering;

use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::{LedgerError, ResultLedger, TransactionKind, categories};

/// Image shown for transactions whose category is unknown to the registry.
pub const DEFAULT_CATEGORY_IMAGE: &str = "default_category";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub image: String,
    pub kind: TransactionKind,
    pub order: i64,
}

impl Category {
    /// Display ordering: `order`, then name for equal `order` values.
    fn display_cmp(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Decodes one loosely-typed category document.
    pub fn from_document(id: &str, document: &Value) -> ResultLedger<Self> {
        let skipped = |reason: &str| LedgerError::DecodeSkipped(format!("category {id}: {reason}"));
        let text = |field: &str| {
            document
                .get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| skipped(&format!("missing {field}")))
        };

        let name = text("category_name")?;
        let image = text("category_image")?;
        let kind = TransactionKind::try_from(text("category_type")?)
            .map_err(|_| skipped("unknown category_type"))?;
        let order = document
            .get("category_order")
            .and_then(coerce_order)
            .ok_or_else(|| skipped("unreadable category_order"))?;

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            kind,
            order,
        })
    }
}

type OrderCoercion = fn(&Value) -> Option<i64>;

/// Representations accepted for `category_order`, in priority order.
const ORDER_COERCIONS: [OrderCoercion; 5] = [
    native_integer,
    wide_integer,
    floating_point,
    numeric_string,
    boxed_number,
];

/// Keys under which a boxed number keeps its payload.
const NUMBER_BOX_KEYS: [&str; 5] = [
    "$numberInt",
    "$numberLong",
    "$numberDouble",
    "number",
    "value",
];

/// Coerces a stored `category_order` value, trying each representation in
/// turn until one succeeds.
pub fn coerce_order(value: &Value) -> Option<i64> {
    ORDER_COERCIONS.iter().find_map(|coerce| coerce(value))
}

fn native_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .filter(|n| i32::try_from(*n).is_ok())
}

fn wide_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().and_then(|n| i64::try_from(n).ok()))
}

fn floating_point(value: &Value) -> Option<i64> {
    let n = value.as_f64()?;
    if !n.is_finite() || n < i64::MIN as f64 || n >= i64::MAX as f64 {
        return None;
    }
    Some(n.trunc() as i64)
}

fn numeric_string(value: &Value) -> Option<i64> {
    value.as_str()?.trim().parse::<i64>().ok()
}

fn boxed_number(value: &Value) -> Option<i64> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (key, inner) = object.iter().next()?;
    if !NUMBER_BOX_KEYS.contains(&key.as_str()) {
        return None;
    }
    // Boxes carry numbers or numeric text, never further boxes.
    ORDER_COERCIONS[..4].iter().find_map(|coerce| coerce(inner))
}

fn name_key(name: &str) -> String {
    name.trim().nfc().collect()
}

/// Read-only view over the curated categories.
#[derive(Clone, Debug, Default)]
pub struct CategoryRegistry {
    categories: Vec<Category>,
    skipped: usize,
}

impl CategoryRegistry {
    /// Loads every stored category document.
    pub async fn load<C>(db: &C) -> ResultLedger<Self>
    where
        C: ConnectionTrait,
    {
        let models = categories::Entity::find().all(db).await?;
        let mut unreadable = 0;
        let documents: Vec<(String, Value)> = models
            .into_iter()
            .filter_map(|model| match serde_json::from_str::<Value>(&model.document) {
                Ok(document) => Some((model.id, document)),
                Err(err) => {
                    tracing::warn!(category = %model.id, "skipping unreadable category document: {err}");
                    unreadable += 1;
                    None
                }
            })
            .collect();

        let mut registry = Self::from_documents(documents);
        registry.skipped += unreadable;
        Ok(registry)
    }

    /// Builds a registry from `(id, document)` pairs.
    pub fn from_documents<I>(documents: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut categories = Vec::new();
        let mut skipped = 0;
        for (id, document) in documents {
            match Category::from_document(&id, &document) {
                Ok(category) => categories.push(category),
                Err(err) => {
                    tracing::warn!("{err}");
                    skipped += 1;
                }
            }
        }
        categories.sort_by(Category::display_cmp);

        Self {
            categories,
            skipped,
        }
    }

    /// Number of documents excluded because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Categories of one kind, ordered by `(order, name)`.
    pub fn list(&self, kind: TransactionKind) -> Vec<&Category> {
        self.categories.iter().filter(|c| c.kind == kind).collect()
    }

    /// Finds a category by display name. Expense categories win over income
    /// categories sharing a name.
    pub fn resolve(&self, name: &str) -> ResultLedger<&Category> {
        let key = name_key(name);
        let mut matches = self.categories.iter().filter(|c| name_key(&c.name) == key);
        let first = matches.next();
        let expense = first
            .filter(|c| c.kind == TransactionKind::Expense)
            .or_else(|| matches.find(|c| c.kind == TransactionKind::Expense));
        expense
            .or(first)
            .ok_or_else(|| LedgerError::CategoryNotFound(name.to_string()))
    }

    /// Image reference for a category name, or [`DEFAULT_CATEGORY_IMAGE`].
    pub fn image_for(&self, name: &str) -> &str {
        self.resolve(name)
            .map(|c| c.image.as_str())
            .unwrap_or(DEFAULT_CATEGORY_IMAGE)
    }
}


use std::sync::Arc;

use strata_document::{Document, DocumentBatch, PrimaryKey};
use strata_format::{Locator, PartitionOptions, Schema};
use strata_io::Directory;
use strata_merge::PluginRegistry;

use crate::{IndexPartition, PartitionReader};

pub(crate) fn open_partition(
    dir: &Arc<dyn Directory>,
    schema: Schema,
    options: PartitionOptions,
) -> IndexPartition {
    IndexPartition::open(dir.clone(), schema, options, Arc::new(PluginRegistry::new())).unwrap()
}

pub(crate) fn batch(documents: impl IntoIterator<Item = Document>) -> DocumentBatch {
    let mut batch = DocumentBatch::new();
    for document in documents {
        batch.push(document);
    }
    batch
}

/// An add carrying the key, a price and the locator `(0, offset)`.
pub(crate) fn add(key: &str, price: i64, offset: i64) -> Document {
    Document::add()
        .with_field("id", key)
        .with_field("price", price)
        .with_field("ts", offset * 10)
        .with_locator(Locator::new(0, offset), offset)
}

pub(crate) fn price_of(reader: &PartitionReader, key: &str) -> Option<i64> {
    reader
        .get(&PrimaryKey::from(key), "price")
        .unwrap()
        .map(|value| value.as_i64().unwrap())
}

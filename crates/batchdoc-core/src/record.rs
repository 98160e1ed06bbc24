//! Records and the schema they share

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::format::snake_case;
use crate::value::{CellValue, FieldValue};

/// Canonical field name mapped to candidate header names
pub type ColumnAliases = BTreeMap<String, Vec<String>>;

/// Field names of one load plus resolved aliases
///
/// Every record of a load holds the same `Arc<Schema>`, so all of them
/// expose the same field-name set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<String>,
    aliases: BTreeMap<String, usize>,
}

impl Schema {
    /// Create a schema; names must already be unique
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            aliases: BTreeMap::new(),
        }
    }

    /// Resolve configured aliases against the field names
    pub fn with_aliases(mut self, aliases: &ColumnAliases) -> Self {
        self.aliases = resolve_aliases(&self.fields, aliases);
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical alias name to the field it resolved to
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(alias, idx)| (alias.as_str(), self.fields[*idx].as_str()))
    }

    /// Column index for a field name or resolved alias
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f == name)
            .or_else(|| self.aliases.get(name).copied())
    }
}

/// One row of source data
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<FieldValue>,
}

impl Record {
    /// Create a record; missing trailing values are filled with empties
    pub fn new(schema: Arc<Schema>, mut values: Vec<FieldValue>) -> Self {
        values.resize(schema.len(), FieldValue::new(CellValue::Empty, ""));
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Look up a field by name or alias
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|idx| &self.values[idx])
    }

    /// Display string of a field, if the field exists
    pub fn display(&self, name: &str) -> Option<&str> {
        self.get(name).map(FieldValue::display)
    }

    /// Field names and values in column order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.schema
            .fields()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Whether every field is empty
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(FieldValue::is_empty)
    }
}

/// Map each canonical name to a column: an exact match of a snake-cased
/// candidate first, then the first column containing any candidate
pub fn resolve_aliases(fields: &[String], aliases: &ColumnAliases) -> BTreeMap<String, usize> {
    let cleaned: Vec<String> = fields.iter().map(|f| snake_case(f)).collect();
    let mut resolved = BTreeMap::new();

    for (canonical, candidates) in aliases {
        if fields.iter().any(|f| f == canonical) {
            continue;
        }
        let candidates: Vec<String> = candidates
            .iter()
            .map(|c| snake_case(c))
            .filter(|c| !c.is_empty())
            .collect();

        let exact = candidates
            .iter()
            .find_map(|cand| cleaned.iter().position(|col| col == cand));
        let partial = || {
            cleaned
                .iter()
                .position(|col| candidates.iter().any(|cand| col.contains(cand.as_str())))
        };

        if let Some(idx) = exact.or_else(partial) {
            resolved.insert(canonical.clone(), idx);
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &[&str]) -> Schema {
        Schema::new(fields.iter().map(|f| f.to_string()).collect())
    }

    fn aliases(pairs: &[(&str, &[&str])]) -> ColumnAliases {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_alias_exact_match_wins_over_partial() {
        let s = schema(&["Product Description", "Product Name", "Batch No."])
            .with_aliases(&aliases(&[("product", &["product_name", "product"])]));
        assert_eq!(s.index_of("product"), Some(1));
    }

    #[test]
    fn test_alias_partial_match() {
        let s = schema(&["Sr", "Total Batch Yield (%)"])
            .with_aliases(&aliases(&[("yield", &["batch_yield"])]));
        assert_eq!(s.index_of("yield"), Some(1));
        let resolved: Vec<_> = s.aliases().collect();
        assert_eq!(resolved, vec![("yield", "Total Batch Yield (%)")]);
    }

    #[test]
    fn test_alias_does_not_shadow_real_field() {
        let s = schema(&["product", "product_name"])
            .with_aliases(&aliases(&[("product", &["product_name"])]));
        assert_eq!(s.index_of("product"), Some(0));
    }

    #[test]
    fn test_unresolved_alias_is_absent() {
        let s = schema(&["Batch"]).with_aliases(&aliases(&[("remarks", &["remarks", "notes"])]));
        assert_eq!(s.index_of("remarks"), None);
    }

    #[test]
    fn test_record_pads_short_rows() {
        let s = Arc::new(schema(&["Batch", "Lot", "Qty"]));
        let record = Record::new(
            s,
            vec![FieldValue::new(CellValue::Text("B100".into()), "")],
        );
        assert_eq!(record.display("Batch"), Some("B100"));
        assert_eq!(record.display("Qty"), Some(""));
        assert_eq!(record.display("Unknown"), None);
        assert_eq!(record.fields().count(), 3);
    }
}

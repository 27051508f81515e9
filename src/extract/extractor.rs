use crate::error::DocumentError;
use crate::extract::accumulator::TableAccumulator;
use crate::extract::types::{ParentRef, Record, RecordKey};
use crate::path::{Match, XPath};
use crate::schema::{CompiledSchema, EntityDef, FieldEntry, FieldSpec, OptionBehavior};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to single spaces and trim
pub fn normalize_text(raw: &str) -> String {
    WHITESPACE_REGEX.replace_all(raw, " ").trim().to_string()
}

fn text_of(item: &Match<'_, '_>) -> String {
    normalize_text(&item.string_value())
}

/// Facts about the document being processed that end up in records
#[derive(Debug, Clone, Copy)]
pub struct DocumentContext<'c> {
    /// Base name of the source file
    pub file_name: &'c str,
}

/// Walks parsed documents against a compiled schema and emits records
pub struct Extractor<'s> {
    schema: &'s CompiledSchema,
}

impl<'s> Extractor<'s> {
    pub fn new(schema: &'s CompiledSchema) -> Self {
        Extractor { schema }
    }

    /// Extract every record of one document into `tables`
    ///
    /// Either the whole document lands in the accumulator or, on error,
    /// nothing of it does.
    pub fn process_document(
        &self,
        doc: &roxmltree::Document<'_>,
        context: &DocumentContext<'_>,
        tables: &mut TableAccumulator,
    ) -> Result<(), DocumentError> {
        tables.begin_document();
        match self.walk_document(doc, context, tables) {
            Ok(()) => {
                tables.commit_document();
                Ok(())
            }
            Err(e) => {
                tables.rollback_document();
                Err(e)
            }
        }
    }

    fn walk_document(
        &self,
        doc: &roxmltree::Document<'_>,
        context: &DocumentContext<'_>,
        tables: &mut TableAccumulator,
    ) -> Result<(), DocumentError> {
        // top-level entries apply to the root element itself
        let root = [Match::Node(doc.root_element())];
        for entry in self.schema.entries() {
            let mut scratch = Record::scratch();
            self.apply(&root, &entry.label, &entry.spec, &mut scratch, context, tables)?;
        }
        Ok(())
    }

    /// Select `field.path` under `node` and apply the field's spec
    fn evaluate(
        &self,
        node: roxmltree::Node<'_, '_>,
        field: &FieldEntry,
        record: &mut Record,
        context: &DocumentContext<'_>,
        tables: &mut TableAccumulator,
    ) -> Result<(), DocumentError> {
        let matches = field.path.select(node);
        self.apply(&matches, field.path.as_str(), &field.spec, record, context, tables)
    }

    fn apply(
        &self,
        matches: &[Match<'_, '_>],
        path: &str,
        spec: &FieldSpec,
        record: &mut Record,
        context: &DocumentContext<'_>,
        tables: &mut TableAccumulator,
    ) -> Result<(), DocumentError> {
        match spec {
            FieldSpec::Plain(column) => set_single(matches, path, &column.name, record),
            FieldSpec::Option(field) => {
                let Some(first) = matches.first() else {
                    return Ok(());
                };
                match &field.behavior {
                    OptionBehavior::Join(joiner) => {
                        let joined = matches.iter().map(text_of).collect::<Vec<_>>().join(joiner);
                        record.set(&field.column, Some(joined));
                    }
                    OptionBehavior::EnumMap(lookup) => {
                        let mapped = lookup.get(&text_of(first)).cloned().flatten();
                        record.set(&field.column, mapped);
                    }
                    OptionBehavior::EnumType(literal) => {
                        record.set(&field.column, Some(literal.clone()));
                    }
                    OptionBehavior::Single => set_single(matches, path, &field.column, record)?,
                }
                Ok(())
            }
            FieldSpec::Entity(def) => {
                let parent = record.as_parent();
                for item in matches {
                    let Match::Node(element) = item else {
                        debug!("Skipping attribute match of {path} for entity {}", def.name);
                        continue;
                    };
                    self.extract_entity(*element, def, parent.as_ref(), context, tables)?;
                }
                Ok(())
            }
            FieldSpec::Fanout(members) => members
                .iter()
                .try_for_each(|member| self.apply(matches, path, member, record, context, tables)),
        }
    }

    /// Build one record of `def` from `element` and append it
    fn extract_entity(
        &self,
        element: roxmltree::Node<'_, '_>,
        def: &EntityDef,
        parent: Option<&ParentRef>,
        context: &DocumentContext<'_>,
        tables: &mut TableAccumulator,
    ) -> Result<(), DocumentError> {
        let key = match &def.primary_key {
            Some(pk_path) => Some(primary_key(element, def, pk_path, parent)?),
            None => parent.map(|p| tables.next_synthetic_key(&def.name, &p.id)),
        };

        let mut record = Record::new(def.name.clone());
        if let Some(key) = key {
            record = record.with_id(key);
        }
        if let Some(parent) = parent {
            record = record.with_parent(parent.clone());
        }
        if let Some(filename_field) = &def.filename_field {
            record.set(filename_field, Some(context.file_name.to_string()));
        }

        for field in &def.fields {
            self.evaluate(element, field, &mut record, context, tables)?;
        }

        tables.append(record);
        Ok(())
    }
}

fn primary_key(
    element: roxmltree::Node<'_, '_>,
    def: &EntityDef,
    pk_path: &XPath,
    parent: Option<&ParentRef>,
) -> Result<RecordKey, DocumentError> {
    match pk_path.select(element).as_slice() {
        [only] => Ok(RecordKey::new(text_of(only))),
        found => Err(DocumentError::MissingPrimaryKey {
            entity: def.name.clone(),
            path: pk_path.to_string(),
            found: found.len(),
            parent_key: parent.map(|p| p.id.0.clone()),
        }),
    }
}

/// The single-value rule: absent, one value, or ambiguous
fn set_single(
    matches: &[Match<'_, '_>],
    path: &str,
    column: &str,
    record: &mut Record,
) -> Result<(), DocumentError> {
    match matches {
        [] => Ok(()),
        [only] => {
            record.set(column, Some(text_of(only)));
            Ok(())
        }
        many => Err(DocumentError::AmbiguousField {
            path: path.to_string(),
            entity: (!record.is_scratch()).then(|| record.entity_type.clone()),
            record_key: record.id.as_ref().map(|id| id.0.clone()),
            matches: many.iter().map(text_of).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn run(schema: &str, xml: &str) -> Result<TableAccumulator, DocumentError> {
        let schema = CompiledSchema::from_yaml_str(schema).unwrap();
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut tables = TableAccumulator::new();
        Extractor::new(&schema).process_document(
            &doc,
            &DocumentContext { file_name: "ipg240102.xml" },
            &mut tables,
        )?;
        Ok(tables)
    }

    fn rows(tables: &TableAccumulator, entity: &str) -> Vec<Value> {
        tables
            .records(entity)
            .iter()
            .map(|r| Value::Object(r.data.clone()))
            .collect()
    }

    const INVENTOR_SCHEMA: &str = r#"
./inventor:
  <entity>: inventor
  <primary_key>: ./id
  <fields>:
    ./name: name
"#;

    #[test]
    fn test_natural_keys() {
        let tables = run(
            r#"
root:
  <entity>: doc
  <primary_key>: ./id
  <fields>:
    ./inventor:
      <entity>: inventor
      <primary_key>: ./id
      <fields>:
        ./name: name
"#,
            "<doc><id>D1</id>\
               <inventor><id>1</id><name>Ada</name></inventor>\
               <inventor><id>2</id><name>Grace</name></inventor></doc>",
        )
        .unwrap();
        assert_eq!(
            rows(&tables, "inventor"),
            vec![
                json!({"id": "1", "doc_id": "D1", "name": "Ada"}),
                json!({"id": "2", "doc_id": "D1", "name": "Grace"}),
            ]
        );
        assert_eq!(rows(&tables, "doc"), vec![json!({"id": "D1"})]);
    }

    #[test]
    fn test_root_entity_uses_document_root() {
        // the top-level label is not evaluated: the root element is the match
        let tables = run(
            INVENTOR_SCHEMA,
            "<inventor><id>7</id><name>  Ada\n   Lovelace </name></inventor>",
        )
        .unwrap();
        assert_eq!(
            rows(&tables, "inventor"),
            vec![json!({"id": "7", "name": "Ada Lovelace"})]
        );
    }

    #[test]
    fn test_synthetic_keys_under_parent() {
        let tables = run(
            r#"
patent:
  <entity>: patent
  <primary_key>: ./number
  <filename_field>: source
  <fields>:
    ./claims/claim:
      <entity>: claim
      <fields>:
        .: text
        ./ref:
          <entity>: claim_ref
          <fields>: {".": target}
"#,
            "<patent><number>US1</number><claims>\
               <claim>first <ref>x</ref></claim>\
               <claim>second <ref>y</ref> <ref>z</ref></claim>\
             </claims></patent>",
        )
        .unwrap();
        assert_eq!(
            rows(&tables, "claim"),
            vec![
                json!({"id": "US1_0", "patent_id": "US1", "text": "first x"}),
                json!({"id": "US1_1", "patent_id": "US1", "text": "second y z"}),
            ]
        );
        assert_eq!(
            rows(&tables, "claim_ref"),
            vec![
                json!({"id": "US1_0_0", "claim_id": "US1_0", "target": "x"}),
                json!({"id": "US1_1_0", "claim_id": "US1_1", "target": "y"}),
                json!({"id": "US1_1_1", "claim_id": "US1_1", "target": "z"}),
            ]
        );
        assert_eq!(
            rows(&tables, "patent"),
            vec![json!({"id": "US1", "source": "ipg240102.xml"})]
        );
    }

    #[test]
    fn test_nested_matches_keyed_in_document_order() {
        let tables = run(
            r#"
claim:
  <entity>: claim
  <primary_key>: "@id"
  <fields>:
    .//claim-text/text():
      <fieldname>: joined
      <joiner>: "|"
    .//claim-text:
      <entity>: claim_text
      <fields>:
        ./text(): text
"#,
            r#"<claim id="C1"><claim-text>a<claim-text>b</claim-text></claim-text><claim-text>c</claim-text></claim>"#,
        )
        .unwrap();
        assert_eq!(
            rows(&tables, "claim"),
            vec![json!({"id": "C1", "joined": "a|b|c"})]
        );
        assert_eq!(
            rows(&tables, "claim_text"),
            vec![
                json!({"id": "C1_0", "claim_id": "C1", "text": "a"}),
                json!({"id": "C1_1", "claim_id": "C1", "text": "b"}),
                json!({"id": "C1_2", "claim_id": "C1", "text": "c"}),
            ]
        );
    }

    #[test]
    fn test_keyless_root_entity_has_no_id() {
        let tables = run(
            "root: {\"<entity>\": note, \"<fields>\": {\"./text\": text}}",
            "<note><text>hi</text></note>",
        )
        .unwrap();
        assert_eq!(rows(&tables, "note"), vec![json!({"text": "hi"})]);
    }

    #[test]
    fn test_option_fields() {
        let tables = run(
            r#"
root:
  <entity>: patent
  <primary_key>: ./id
  <fields>:
    ./kw:
      <fieldname>: keywords
      <joiner>: " ; "
    ./kind:
      <fieldname>: kind
      <enum_map>: {B1: utility, S1: design}
    ./status:
      <fieldname>: status
      <enum_map>: {A: active}
    ./design-flag:
      <fieldname>: type
      <enum_type>: design
    ./missing:
      <fieldname>: absent
      <joiner>: ","
"#,
            "<p><id>1</id><kw>a</kw><kw>b</kw><kind>S1</kind><status>Z</status>\
               <design-flag/><design-flag/></p>",
        )
        .unwrap();
        assert_eq!(
            rows(&tables, "patent"),
            vec![json!({
                "id": "1",
                "keywords": "a ; b",
                "kind": "design",
                "status": null,
                "type": "design"
            })]
        );
    }

    #[test]
    fn test_fanout_scalar_and_entity() {
        let tables = run(
            r#"
root:
  <entity>: patent
  <primary_key>: "@id"
  <fields>:
    ./abstract:
      - abstract
      - <entity>: abstract_paragraph
        <fields>:
          ./p: text
"#,
            r#"<patent id="P9"><abstract><p>one</p></abstract></patent>"#,
        )
        .unwrap();
        assert_eq!(
            rows(&tables, "patent"),
            vec![json!({"id": "P9", "abstract": "one"})]
        );
        assert_eq!(
            rows(&tables, "abstract_paragraph"),
            vec![json!({"id": "P9_0", "patent_id": "P9", "text": "one"})]
        );
    }

    #[test]
    fn test_ambiguous_field_rolls_back_document() {
        let schema = CompiledSchema::from_yaml_str(
            r#"
root:
  <entity>: patent
  <primary_key>: ./id
  <fields>:
    ./inventor:
      <entity>: inventor
      <fields>: {"./name": name}
    ./title: title
"#,
        )
        .unwrap();
        let extractor = Extractor::new(&schema);
        let context = DocumentContext { file_name: "f.xml" };
        let mut tables = TableAccumulator::new();

        let good = roxmltree::Document::parse(
            "<p><id>1</id><inventor><name>A</name></inventor><title>T</title></p>",
        )
        .unwrap();
        extractor.process_document(&good, &context, &mut tables).unwrap();

        let bad = roxmltree::Document::parse(
            "<p><id>2</id><inventor><name>B</name></inventor><title>x</title><title>y</title></p>",
        )
        .unwrap();
        let err = extractor.process_document(&bad, &context, &mut tables).unwrap_err();
        match err {
            DocumentError::AmbiguousField {
                path,
                entity,
                record_key,
                matches,
            } => {
                assert_eq!(path, "./title");
                assert_eq!(entity.as_deref(), Some("patent"));
                assert_eq!(record_key.as_deref(), Some("2"));
                assert_eq!(matches, ["x", "y"]);
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(tables.records("patent").len(), 1);
        assert_eq!(tables.records("inventor").len(), 1);
        assert_eq!(tables.next_synthetic_key("inventor", &RecordKey::new("2")).0, "2_0");
    }

    #[test]
    fn test_missing_primary_key() {
        let err = run(INVENTOR_SCHEMA, "<inventor><name>Ada</name></inventor>").unwrap_err();
        assert!(matches!(
            err,
            DocumentError::MissingPrimaryKey { ref entity, found: 0, .. } if entity == "inventor"
        ));

        let err = run(INVENTOR_SCHEMA, "<inventor><id>1</id><id>2</id></inventor>").unwrap_err();
        assert!(matches!(err, DocumentError::MissingPrimaryKey { found: 2, .. }));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  a \n\t b  "), "a b");
        assert_eq!(normalize_text("a\u{a0}b"), "a b");
        assert_eq!(normalize_text(""), "");
    }
}

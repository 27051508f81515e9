use std::fs;
use std::path::Path;
use xmltab::{run, OutputKind, TabulateConfig};

const SCHEMA: &str = r#"
us-patent-grant:
  <entity>: patent
  <primary_key>: ./number
  <filename_field>: source
  <fields>:
    ./title: title
    ./inventors/inventor:
      <entity>: inventor
      <fields>:
        ./name: name
"#;

const DTD: &str = r#"<!ENTITY company "ACME">
<!ELEMENT us-patent-grant (number, title+, inventors?)>
"#;

const GOOD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE us-patent-grant SYSTEM "grant.dtd">
<us-patent-grant>
<number>US1</number>
<title>Widget by &company;</title>
<inventors><inventor><name>Ada</name></inventor><inventor><name>Grace</name></inventor></inventors>
</us-patent-grant>
"#;

const WRAPPER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE sequence-cwu SYSTEM "us-sequence-listing.dtd">
<sequence-cwu><number>SEQ</number></sequence-cwu>
"#;

const AMBIGUOUS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE us-patent-grant SYSTEM "grant.dtd">
<us-patent-grant>
<number>US2</number>
<title>First</title>
<title>Second</title>
<inventors><inventor><name>Linus</name></inventor></inventors>
</us-patent-grant>
"#;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new(documents: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), SCHEMA).unwrap();
        fs::create_dir(dir.path().join("dtds")).unwrap();
        fs::write(dir.path().join("dtds/grant.dtd"), DTD).unwrap();
        fs::create_dir(dir.path().join("in")).unwrap();
        fs::write(dir.path().join("in/ipg240102.xml"), documents.concat()).unwrap();
        Workspace { dir }
    }

    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }

    fn config(&self) -> TabulateConfig {
        TabulateConfig {
            inputs: vec![self.path("in").to_string_lossy().into_owned()],
            schema_path: self.path("config.yaml"),
            dtd_dir: Some(self.path("dtds")),
            output_dir: self.path("out"),
            ..TabulateConfig::default()
        }
    }
}

fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (header, rows)
}

#[test]
fn test_multi_document_file_to_csv() {
    let ws = Workspace::new(&[GOOD, WRAPPER]);
    let summary = run(&ws.config()).unwrap();
    assert_eq!(summary.documents, 1);
    assert_eq!(summary.wrappers, 1);
    assert_eq!(summary.records["inventor"], 2);

    let (header, rows) = read_csv(&ws.path("out/patent.csv"));
    assert_eq!(header, ["id", "source", "title"]);
    assert_eq!(rows, [["US1", "ipg240102.xml", "Widget by ACME"]]);

    let (header, rows) = read_csv(&ws.path("out/inventor.csv"));
    assert_eq!(header, ["id", "patent_id", "name"]);
    assert_eq!(
        rows,
        [["US1_0", "US1", "Ada"], ["US1_1", "US1", "Grace"]]
    );
}

#[test]
fn test_failed_document_stops_run_without_flushing() {
    let ws = Workspace::new(&[GOOD, AMBIGUOUS]);
    let err = run(&ws.config()).unwrap_err();
    assert!(format!("{err:#}").contains("multiple elements found for ./title"));
    assert!(!ws.path("out/patent.csv").exists());
}

#[test]
fn test_continue_on_error_skips_failed_document() {
    let ws = Workspace::new(&[AMBIGUOUS, GOOD]);
    let config = TabulateConfig {
        continue_on_error: true,
        ..ws.config()
    };
    let summary = run(&config).unwrap();
    assert_eq!(summary.documents, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.is_failure());

    // nothing of the failed document survives, including its key counters
    let (_, rows) = read_csv(&ws.path("out/inventor.csv"));
    assert_eq!(rows, [["US1_0", "US1", "Ada"], ["US1_1", "US1", "Grace"]]);
}

#[test]
fn test_second_run_appends_without_header() {
    let ws = Workspace::new(&[GOOD]);
    run(&ws.config()).unwrap();
    fs::write(ws.path("in/ipg240102.xml"), GOOD.replace("US1", "US3")).unwrap();
    run(&ws.config()).unwrap();

    let (_, rows) = read_csv(&ws.path("out/patent.csv"));
    let ids: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(ids, ["US1", "US3"]);
}

#[test]
fn test_jsonl_output() {
    let ws = Workspace::new(&[GOOD]);
    let config = TabulateConfig {
        output_kind: OutputKind::Jsonl,
        ..ws.config()
    };
    run(&config).unwrap();

    let text = fs::read_to_string(ws.path("out/inventor.jsonl")).unwrap();
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(
        first,
        serde_json::json!({"id": "US1_0", "patent_id": "US1", "name": "Ada"})
    );
}

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_output() {
    let ws = Workspace::new(&[GOOD]);
    let config = TabulateConfig {
        output_kind: OutputKind::Sqlite,
        ..ws.config()
    };
    run(&config).unwrap();

    let conn = rusqlite::Connection::open(ws.path("out/db.sqlite")).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM inventor WHERE patent_id = 'US1'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn test_invalid_input_is_fatal() {
    let ws = Workspace::new(&[GOOD]);
    let config = TabulateConfig {
        inputs: vec![ws.path("missing.xml").to_string_lossy().into_owned()],
        ..ws.config()
    };
    assert!(run(&config).is_err());
}

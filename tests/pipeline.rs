//! End-to-end ingestion runs.

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use scanfilter::sink::SinkConfig;
use scanfilter::{
    BatchSink, Filter, InputFormat, JsonSink, Pipeline, PipelineConfig, RuleSet, RunState, Sink,
    SqliteStore, StoreConfig,
};
use std::io::Write;
use std::sync::Arc;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn lines(&self) -> Vec<serde_json::Value> {
        let data = self.0.lock().clone();
        String::from_utf8(data)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

fn gzip_input(lines: &[&str]) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".json.gz").tempfile().unwrap();
    let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap();
    file
}

fn plain_input(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

fn rules(text: &str) -> RuleSet {
    RuleSet::from_reader(text.as_bytes()).unwrap()
}

#[test]
fn test_gzip_fdns_into_sqlite() {
    let input = gzip_input(&[
        r#"{"timestamp":"1","name":"www.example.com","type":"a","value":"192.0.2.1"}"#,
        r#"{"timestamp":"2","name":"api.example.com","type":"cname","value":"lb.example.net"}"#,
        r#"{"timestamp":"3","name":"other.org","type":"a","value":"10.0.0.5"}"#,
        r#"{"timestamp":"4","name":"notexample.com","type":"a","value":"192.0.2.2"}"#,
        r#"{"timestamp":"5","name":"www.example.com","type":"a","value":"192.0.2.3"}"#,
        r#"{"timestamp":"6","name":"#,
    ]);

    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path().join("hosts.db"));
    let store = SqliteStore::open(&config).unwrap();
    store.ensure_schema().unwrap();

    let filter = Filter::from_rulesets(Some(rules("# scope\nexample.com\n10.0.0.0/24\n")), None);
    let pipeline_config = PipelineConfig::default()
        .with_format(InputFormat::Rapid7Fdns)
        .with_workers(4)
        .with_sink(SinkConfig::default().with_batch_size(2));
    let sink = Sink::Batch(BatchSink::spawn(store, pipeline_config.sink).unwrap());

    let pipeline = Pipeline::new(pipeline_config, Arc::new(filter), sink);
    let stats = pipeline.run(input.path()).unwrap();

    assert_eq!(pipeline.state(), RunState::Closed);
    assert_eq!(stats.lines, 6);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.sink.submitted, 4);
    assert_eq!(stats.sink.completed, 4);
    assert_eq!(stats.sink.written, 3);
    assert_eq!(stats.sink.rejected, 1);
    assert_eq!(stats.sink.commits, 2);

    let check = SqliteStore::open(&config).unwrap();
    assert_eq!(check.count().unwrap(), 3);
}

#[test]
fn test_allow_and_deny_domains() {
    let input = plain_input(&[
        r#"{"name":"www.corp.com","type":"a","value":"192.0.2.1"}"#,
        r#"{"name":"db.internal.corp.com","type":"a","value":"192.0.2.2"}"#,
        r#"{"name":"www.other.com","type":"a","value":"192.0.2.3"}"#,
    ]);

    let filter = Filter::from_rulesets(Some(rules("corp.com\n")), Some(rules("internal.corp.com\n")));
    let buf = SharedBuf::default();
    let sink = Sink::Json(JsonSink::spawn(buf.clone(), 16).unwrap());
    let config = PipelineConfig::default()
        .with_format(InputFormat::Rapid7Fdns)
        .with_workers(2);

    let stats = Pipeline::new(config, Arc::new(filter), sink)
        .run(input.path())
        .unwrap();
    assert_eq!(stats.accepted, 1);

    let lines = buf.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["name"], "www.corp.com");
    assert_eq!(lines[0]["type"], "a");
    assert_eq!(lines[0]["value"], "192.0.2.1");
}

#[test]
fn test_http_dump_by_range() {
    let input = plain_input(&[
        r#"{"ip":"192.0.2.10","data":{"http":{"response":{"body":"<html>a</html>","headers":{"Server":["nginx"],"unknown":[{"key":"X-Custom","value":["1"]}]}}}}}"#,
        r#"{"ip":"198.51.100.1","data":{"http":{"response":{"body":"<html>b</html>","headers":{}}}}}"#,
        r#"{"ip":"192.0.2.11"}"#,
    ]);

    let filter = Filter::from_rulesets(Some(rules("192.0.2.0/24\n")), None);
    let buf = SharedBuf::default();
    let sink = Sink::Json(JsonSink::spawn(buf.clone(), 16).unwrap());
    let config = PipelineConfig::default()
        .with_format(InputFormat::Rapid7Http)
        .with_workers(2);

    let stats = Pipeline::new(config, Arc::new(filter), sink)
        .run(input.path())
        .unwrap();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.accepted, 2);

    let mut lines = buf.lines();
    lines.sort_by(|a, b| a["address"].as_str().cmp(&b["address"].as_str()));
    assert_eq!(lines[0]["address"], "192.0.2.10");
    assert_eq!(lines[0]["body"], "<html>a</html>");
    assert_eq!(lines[0]["headers"]["Server"][0], "nginx");
    assert_eq!(lines[0]["headers"]["X-Custom"][0], "1");
    assert_eq!(lines[1]["address"], "192.0.2.11");
    assert_eq!(lines[1]["body"], "");
}

#[test]
fn test_corrupt_gzip_aborts() {
    let file = tempfile::Builder::new().suffix(".json.gz").tempfile().unwrap();
    std::fs::write(file.path(), b"definitely not gzip").unwrap();

    let sink = Sink::Json(JsonSink::spawn(std::io::sink(), 16).unwrap());
    let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(Filter::new()), sink);

    assert!(pipeline.run(file.path()).is_err());
    assert_eq!(pipeline.state(), RunState::FatalAborted);
}

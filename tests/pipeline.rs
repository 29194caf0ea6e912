//! End-to-end runs: captured streams in, one HAR document out.

mod common;

use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    drain_errors, test_context, test_context_with, text_reader, ChannelSource, CountingMiddleware, FailingStart,
    TaggingMiddleware,
};
use harvest::config::FlowConfig;
use harvest::flow::{FileSource, Input, OutputFormat, Pipeline, SharedMiddleware, StreamMeta, StreamReader};
use harvest::http::{Har, HarDocument, HttpFormat, Message};
use harvest::Error;

fn capture(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

async fn read_har(path: &Path) -> HarDocument {
    let bytes = tokio::fs::read(path).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn files_become_har_entries() {
    let (ctx, mut errors) = test_context();
    let answered = capture("GET /a HTTP/1.1\r\nheader:foo\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n");
    let unanswered = capture(
        "POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 6\r\n\r\nuser=x",
    );
    let out = tempfile::NamedTempFile::new().unwrap();

    let input = Input::new(
        FileSource::new([answered.path(), unanswered.path()]),
        Vec::new(),
        HttpFormat::new(&ctx),
    );
    let pipeline = Pipeline::new(input, Har::new(&ctx), None);
    let writer = tokio::fs::File::create(out.path()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), pipeline.run(&ctx, writer))
        .await
        .expect("pipeline should finish once both files are parsed");
    assert!(ctx.is_cancelled());

    let doc = read_har(out.path()).await;
    assert_eq!(doc.log.version, "1.2");
    assert_eq!(doc.log.entries.len(), 2);

    let get = doc
        .log
        .entries
        .iter()
        .find(|e| e.request.method == "GET")
        .unwrap();
    assert_eq!(get.response.status, 204);
    assert!(get.request.url.ends_with("/a"));
    assert_eq!(get.request.headers[0].name, "Header");
    assert!(get.comment.is_none());

    let post = doc
        .log
        .entries
        .iter()
        .find(|e| e.request.method == "POST")
        .unwrap();
    assert_eq!(post.response.status, 0);
    assert_eq!(post.time, 0);
    assert_eq!(post.comment.as_deref(), Some("incomplete"));
    assert_eq!(post.request.post_data.as_ref().unwrap().params[0].name, "user");

    assert!(drain_errors(&mut errors).is_empty());
}

#[tokio::test]
async fn middleware_applies_before_correlation() {
    let (ctx, _errors) = test_context();
    let out = tempfile::NamedTempFile::new().unwrap();

    let source = ChannelSource::from_readers(vec![text_reader(
        "c1",
        "GET /111.html HTTP/1.1\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
    )]);
    let input = Input::new(source, Vec::new(), HttpFormat::new(&ctx));
    let middleware: SharedMiddleware<Message> = Arc::new(TaggingMiddleware { tag: "111" });
    let pipeline = Pipeline::new(input, Har::new(&ctx), Some(middleware));

    let writer = tokio::fs::File::create(out.path()).await.unwrap();
    pipeline.run(&ctx, writer).await;

    let doc = read_har(out.path()).await;
    assert_eq!(doc.log.entries.len(), 1);
    assert_eq!(doc.log.entries[0].response.status_text, "200 OK 111");
    assert_eq!(doc.log.entries[0].response.content.text, "ok");
}

#[tokio::test]
async fn cancellation_mid_stream_still_writes_archive() {
    let (ctx, _errors) = test_context();
    let out = tempfile::NamedTempFile::new().unwrap();

    let (source, feed) = ChannelSource::new();
    feed.send(text_reader("done", "GET /x HTTP/1.1\r\n\r\n")).unwrap();
    let (client, mut server) = tokio::io::duplex(1024);
    feed.send(harvest::flow::StreamReader::boxed(
        harvest::flow::StreamMeta::new("open"),
        client,
    ))
    .unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut server, b"GET /y HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let input = Input::new(source, Vec::new(), HttpFormat::new(&ctx));
    let har = Har::new(&ctx);
    let completion = har.complete();
    let pipeline = Pipeline::new(input, har, None);

    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.cancel();
        })
    };

    let writer = tokio::fs::File::create(out.path()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), pipeline.run(&ctx, writer))
        .await
        .expect("no stage may block shutdown");
    canceller.await.unwrap();
    assert!(completion.is_complete());

    let doc = read_har(out.path()).await;
    let mut urls: Vec<_> = doc.log.entries.iter().map(|e| e.request.url.clone()).collect();
    urls.sort();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].ends_with("/x"));
    assert!(urls[1].ends_with("/y"));
    assert!(doc.log.entries.iter().all(|e| e.comment.as_deref() == Some("incomplete")));
    drop(feed);
}

#[tokio::test]
async fn middleware_start_failure_writes_empty_archive() {
    let (ctx, mut errors) = test_context();
    let out = tempfile::NamedTempFile::new().unwrap();
    let source = ChannelSource::from_readers(vec![text_reader("c1", "GET / HTTP/1.1\r\n\r\n")]);
    let input = Input::new(source, Vec::new(), HttpFormat::new(&ctx));
    let middleware: SharedMiddleware<Message> = Arc::new(FailingStart);
    let har = Har::new(&ctx);
    let completion = har.complete();
    let pipeline = Pipeline::new(input, har, Some(middleware));

    let writer = tokio::fs::File::create(out.path()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), pipeline.run(&ctx, writer))
        .await
        .expect("a failed start must not block the output");

    assert!(ctx.is_cancelled());
    assert!(completion.is_complete());
    let doc = read_har(out.path()).await;
    assert!(doc.log.entries.is_empty());
    let errors = drain_errors(&mut errors);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::Middleware { .. }));
    assert!(errors[0].to_string().contains("111"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_under_load_keeps_accepted_messages() {
    let mut capture = Vec::new();
    for i in 0..400 {
        capture.extend_from_slice(format!("GET /{} HTTP/1.1\r\n\r\n", i).as_bytes());
    }

    for round in 0..40 {
        let (ctx, _errors) = test_context_with(FlowConfig {
            buffer_size: 1,
            ..FlowConfig::default()
        });
        let out = tempfile::NamedTempFile::new().unwrap();

        let reader = StreamReader::boxed(StreamMeta::new("c1"), std::io::Cursor::new(capture.clone()));
        let input = Input::new(
            ChannelSource::from_readers(vec![reader]),
            Vec::new(),
            HttpFormat::new(&ctx),
        );
        let counter = CountingMiddleware::default();
        let seen = Arc::clone(&counter.seen);
        let pipeline = Pipeline::new(input, Har::new(&ctx), Some(Arc::new(counter) as SharedMiddleware<Message>));

        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                for _ in 0..round * 3 {
                    tokio::task::yield_now().await;
                }
                ctx.cancel();
            })
        };

        let writer = tokio::fs::File::create(out.path()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), pipeline.run(&ctx, writer))
            .await
            .expect("no stage may block shutdown");
        canceller.await.unwrap();

        // Only the message in flight when cancellation hit may be dropped.
        let accepted = seen.load(Ordering::SeqCst);
        let entries = read_har(out.path()).await.log.entries.len();
        assert!(
            entries <= accepted && entries + 1 >= accepted,
            "round {}: {} messages accepted, {} archived",
            round,
            accepted,
            entries
        );
    }
}

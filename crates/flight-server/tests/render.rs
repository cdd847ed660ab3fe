use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::anyhow;
use flight_core::{FlightConfig, ModuleMetadata};
use flight_server::{
    ClientManifest, ClientModule, ClientReference, Deferred, Element, Failure, RenderStream,
    Request, RequestOptions, StaticManifest, Value,
};
use futures::{FutureExt, StreamExt};
use tracing_test::traced_test;

fn empty_manifest() -> Arc<dyn ClientManifest> {
    Arc::new(StaticManifest::new())
}

fn digest_options(calls: &Arc<AtomicUsize>) -> RequestOptions {
    let calls = Arc::clone(calls);
    RequestOptions::default().on_error(move |err| {
        calls.fetch_add(1, Ordering::SeqCst);
        Some(format!("digest(\"{err}\")"))
    })
}

fn drain(stream: RenderStream) -> Vec<String> {
    let rows: Vec<_> = futures::executor::block_on(stream.collect());
    rows.iter()
        .map(|row| String::from_utf8(row.to_vec()).expect("utf8 row"))
        .collect()
}

/// 立即可得的下一行；流挂起时返回 `None`。
fn next_now(stream: &mut RenderStream) -> Option<String> {
    stream
        .next()
        .now_or_never()
        .flatten()
        .map(|row| String::from_utf8(row.to_vec()).expect("utf8 row"))
}

#[test]
fn plain_values_outline_shared_subtrees_and_symbols() {
    let shared = Value::shared(Value::array([1, 2]));
    let root = Value::object([
        ("a", Value::Undefined),
        ("n", Value::Number(f64::NAN)),
        ("big", Value::BigInt("123".into())),
        ("s", shared.clone()),
        ("t", shared),
        ("sym", Value::symbol("react.fragment")),
        ("again", Value::symbol("react.fragment")),
    ]);
    let rows = drain(Request::new(empty_manifest(), RequestOptions::default()).render(root));
    assert_eq!(
        rows,
        [
            "2:[1,2]\n",
            "3:S\"react.fragment\"\n",
            "1:{\"a\":\"$undefined\",\"n\":\"$NaN\",\"big\":\"$n123\",\"s\":\"$2\",\"t\":\"$2\",\"sym\":\"$3\",\"again\":\"$3\"}\n",
        ]
    );
}

#[test]
fn strings_starting_with_the_marker_are_escaped() {
    let root = Value::object([("text", Value::from("$1")), ("at", Value::from("@div"))]);
    let rows = drain(Request::new(empty_manifest(), RequestOptions::default()).render(root));
    assert_eq!(rows, ["1:{\"text\":\"$$1\",\"at\":\"@div\"}\n"]);
}

#[test]
fn unrelated_siblings_do_not_wait_for_each_other() {
    let (settle_slow, slow) = Deferred::channel();
    let (settle_fast, fast) = Deferred::channel();
    let root = Value::object([("slow", Value::from(slow)), ("fast", Value::from(fast))]);
    let mut stream = Request::new(empty_manifest(), RequestOptions::default()).render(root);

    assert_eq!(
        next_now(&mut stream).as_deref(),
        Some("1:{\"slow\":\"$2\",\"fast\":\"$3\"}\n")
    );
    assert_eq!(next_now(&mut stream), None);

    settle_fast.resolve("fast done");
    assert_eq!(next_now(&mut stream).as_deref(), Some("3:\"fast done\"\n"));
    assert_eq!(next_now(&mut stream), None);

    settle_slow.resolve(Element::new("p").child("slow done"));
    assert_eq!(
        next_now(&mut stream).as_deref(),
        Some("2:[\"$\",\"p\",null,{\"children\":\"slow done\"}]\n")
    );
    assert_eq!(stream.next().now_or_never(), Some(None));
}

#[test]
fn promises_pass_through_without_blocking_the_parent() {
    let (settle, deferred) = Deferred::channel();
    let root = Value::object([("promise", Value::Promise(deferred))]);
    let mut stream = Request::new(empty_manifest(), RequestOptions::default()).render(root);
    assert_eq!(
        next_now(&mut stream).as_deref(),
        Some("1:{\"promise\":\"$@2\"}\n")
    );
    settle.resolve(42);
    assert_eq!(next_now(&mut stream).as_deref(), Some("2:42\n"));
}

#[test]
fn a_failure_shared_by_two_parents_is_reported_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let failing = Deferred::failed(Failure::msg("Game over"));
    let root = Value::object([
        ("left", Value::from(failing.clone())),
        ("right", Value::from(failing)),
        ("ok", Value::from("fine")),
    ]);
    let rows = drain(Request::new(empty_manifest(), digest_options(&calls)).render(root));
    assert_eq!(
        rows,
        [
            "1:{\"left\":\"$2\",\"right\":\"$2\",\"ok\":\"fine\"}\n",
            "2:E{\"digest\":\"digest(\\\"Game over\\\")\"}\n",
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn development_mode_adds_the_message() {
    let options = RequestOptions::default()
        .with_config(FlightConfig::development())
        .on_error(|_| Some("a dev digest".to_owned()));
    let root = Value::Deferred(Deferred::failed(Failure::msg("Game over")));
    let rows = drain(Request::new(empty_manifest(), options).render(root));
    assert_eq!(
        rows,
        ["1:E{\"digest\":\"a dev digest\",\"message\":\"Game over\"}\n"]
    );
}

#[test]
fn postponed_values_emit_postpone_rows_without_reporting() {
    let calls = Arc::new(AtomicUsize::new(0));
    let root = Value::array([Value::Deferred(Deferred::failed(Failure::postponed("later")))]);
    let rows = drain(Request::new(empty_manifest(), digest_options(&calls)).render(root));
    assert_eq!(rows, ["1:[\"$2\"]\n", "2:P{}\n"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
#[traced_test]
fn abort_settles_every_pending_id_and_reports_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let root = Value::object([
        ("a", Value::from(Deferred::never())),
        ("b", Value::from(Deferred::never())),
        ("c", Value::from("done")),
    ]);
    let mut stream = Request::new(empty_manifest(), digest_options(&calls)).render(root);
    assert_eq!(
        next_now(&mut stream).as_deref(),
        Some("1:{\"a\":\"$2\",\"b\":\"$3\",\"c\":\"done\"}\n")
    );
    assert_eq!(next_now(&mut stream), None);

    let abort = stream.abort_handle();
    assert!(abort.abort("for reasons"));
    assert!(!abort.abort("twice"));

    let rows = drain(stream);
    assert_eq!(
        rows,
        [
            "2:E{\"digest\":\"digest(\\\"for reasons\\\")\"}\n",
            "3:E{\"digest\":\"digest(\\\"for reasons\\\")\"}\n",
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(logs_contain("request aborted"));
}

#[test]
fn one_client_export_yields_one_module_row() {
    let module = ClientModule::new("./Counter.js");
    let manifest = StaticManifest::new().with_export(
        "./Counter.js",
        "Counter",
        ModuleMetadata::new("counter", "Counter").with_chunks(["c1"]),
    );
    let root = Value::array([
        Value::from(Element::new(module.export("Counter"))),
        Value::from(Element::new(module.export("Counter")).prop("n", 1)),
    ]);
    let rows = drain(Request::new(Arc::new(manifest), RequestOptions::default()).render(root));
    assert_eq!(
        rows,
        [
            "2:I{\"id\":\"counter\",\"chunks\":[\"c1\"],\"name\":\"Counter\"}\n",
            "1:[[\"$\",\"$2\",null,{}],[\"$\",\"$2\",null,{\"n\":1}]]\n",
        ]
    );
}

#[test]
fn whole_module_entries_use_export_paths() {
    let module = ClientModule::new("./ui.js");
    let manifest = StaticManifest::new().with_module("./ui.js", ModuleMetadata::new("ui", "*"));
    let root = Value::array([
        Value::Client(module.export("Button")),
        Value::Client(module.export("Card")),
        Value::Client(module.whole()),
    ]);
    let rows = drain(Request::new(Arc::new(manifest), RequestOptions::default()).render(root));
    assert_eq!(
        rows,
        [
            "2:I{\"id\":\"ui\",\"chunks\":[],\"name\":\"*\"}\n",
            "1:[\"$2:Button\",\"$2:Card\",\"$2\"]\n",
        ]
    );
}

#[test]
fn manifest_failures_become_error_rows() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manifest = |_: &ClientReference| -> anyhow::Result<ModuleMetadata> {
        Err(anyhow!("bug in the bundler"))
    };
    let component = ClientModule::new("./Component.js").export("Component");
    let root = Value::from(Element::new("div").child(Element::new(component)));
    let rows = drain(Request::new(Arc::new(manifest), digest_options(&calls)).render(root));
    assert_eq!(
        rows,
        [
            "2:E{\"digest\":\"digest(\\\"bug in the bundler\\\")\"}\n",
            "1:[\"$\",\"div\",null,{\"children\":[\"$\",\"$2\",null,{}]}]\n",
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn hints_are_deduplicated_across_suspension_points() {
    let module = ClientModule::new("./Component.js");
    let manifest =
        StaticManifest::new().with_export("./Component.js", "", ModuleMetadata::new("c", ""));
    let request = Request::new(Arc::new(manifest), RequestOptions::default());
    let hints = request.hints();
    let component = module.export("");
    let root = Deferred::new(async move {
        hints.prefetch_dns("dns");
        hints.preconnect("preconnect", None);
        hints.preload("load", "style");
        hints.preinit("init", "script");
        hints.prefetch_dns("dns");
        hints.preconnect("preconnect", Some("anonymous"));
        hints.preload("load", "style");
        hints.preinit("init", "script");
        tokio::task::yield_now().await;
        hints.prefetch_dns("dns");
        hints.preconnect("preconnect", Some("use-credentials"));
        hints.preload("load", "style");
        hints.preinit("init", "script");
        hints.preinit("init", "style");
        hints.preinit("init", "module");
        Ok(Value::from(Element::new(component)))
    });

    let mut output = Vec::new();
    request
        .render(Value::from(root))
        .pipe(&mut output)
        .await
        .expect("pipe into memory");
    let text = String::from_utf8(output).expect("utf8");
    let hint_rows: Vec<&str> = text.lines().filter(|row| row.contains(":H")).collect();
    assert_eq!(
        hint_rows,
        [
            "2:HD\"dns\"",
            "3:HC\"preconnect\"",
            "4:HL[\"load\",\"style\"]",
            "5:HI[\"init\",\"script\"]",
            "6:HC[\"preconnect\",\"anonymous\"]",
            "7:HC[\"preconnect\",\"use-credentials\"]",
        ]
    );
    assert_eq!(text.lines().filter(|row| row.contains(":HI")).count(), 1);
    assert!(text.ends_with("8:I{\"id\":\"c\",\"chunks\":[],\"name\":\"\"}\n1:[\"$\",\"$8\",null,{}]\n"));
}

#[test]
fn preconnect_without_cross_origin_is_distinct_from_a_null_mode() {
    let request = Request::new(empty_manifest(), RequestOptions::default());
    let hints = request.hints();
    assert!(hints.preconnect("cdn", None));
    assert!(hints.preconnect("cdn", Some("null")));
    assert!(!hints.preconnect("cdn", None));
    assert!(!hints.preconnect("cdn", Some("null")));

    let rows = drain(request.render(Value::Null));
    assert_eq!(
        rows,
        ["2:HC\"cdn\"\n", "3:HC[\"cdn\",\"null\"]\n", "1:null\n"]
    );
}

#[test]
fn separate_requests_keep_separate_hint_tables() {
    let first = Request::new(empty_manifest(), RequestOptions::default());
    let second = Request::new(empty_manifest(), RequestOptions::default());
    assert!(first.hints().preload("a.css", "style"));
    assert!(!first.hints().preload("a.css", "style"));
    assert!(second.hints().preload("a.css", "style"));
}

proptest::proptest! {
    #[test]
    fn root_strings_render_as_escaped_json(text in "\\PC{0,24}") {
        let rows = drain(Request::new(empty_manifest(), RequestOptions::default()).render(Value::from(text.as_str())));
        proptest::prop_assert_eq!(rows.len(), 1);
        let payload = rows[0]
            .strip_prefix("1:")
            .and_then(|row| row.strip_suffix('\n'))
            .expect("model row");
        let decoded: String = serde_json::from_str(payload).expect("json string");
        let expected = if text.starts_with('$') { format!("${text}") } else { text.clone() };
        proptest::prop_assert_eq!(decoded, expected);
    }
}

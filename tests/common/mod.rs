//! In-memory page and scripted model shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use browser_agent::brain::{ChatModel, CompletionRequest, ModelReply};
use browser_agent::error::{ModelError, PageError};
use browser_agent::page::{Capability, Page, WaitUntil};
use browser_agent::scripts;
use browser_agent::types::ToolCall;
use browser_agent::xpath::{self, Axis, CompareOp, Expr, NodeTest, Step};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub text: String,
    pub visible: bool,
    /// URL loaded when the element is clicked.
    pub opens: Option<String>,
    /// URL loaded when the element's form is submitted.
    pub submits_to: Option<String>,
}

impl FakeElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            visible: true,
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn opens(mut self, url: &str) -> Self {
        self.opens = Some(url.to_string());
        self
    }

    pub fn submits_to(mut self, url: &str) -> Self {
        self.submits_to = Some(url.to_string());
        self
    }

    fn describe(&self) -> Value {
        let mut map = Map::new();
        map.insert("tag".into(), json!(self.tag));
        for (attr, key) in [
            ("id", "id"),
            ("name", "name"),
            ("value", "value"),
            ("href", "href"),
            ("placeholder", "placeholder"),
            ("aria-label", "ariaLabel"),
            ("role", "role"),
            ("title", "title"),
            ("class", "classes"),
        ] {
            if let Some(v) = self.attrs.get(attr) {
                map.insert(key.into(), json!(v));
            }
        }
        if !self.text.is_empty() {
            map.insert("text".into(), json!(self.text));
        }
        map.insert("visible".into(), json!(self.visible));
        Value::Object(map)
    }

    fn outer_html(&self) -> String {
        let mut attrs: Vec<_> = self.attrs.iter().collect();
        attrs.sort();
        let attrs: String = attrs.iter().map(|(k, v)| format!(" {k}=\"{v}\"")).collect();
        format!("<{}{attrs}>{}</{}>", self.tag, self.text, self.tag)
    }
}

/// One loaded document: a flat list of elements under the root.
#[derive(Debug, Clone, Default)]
pub struct FakeDocument {
    pub url: String,
    pub elements: Vec<FakeElement>,
    pub main_text: String,
}

impl FakeDocument {
    pub fn new(url: &str, main_text: &str, elements: Vec<FakeElement>) -> Self {
        Self {
            url: url.to_string(),
            elements,
            main_text: main_text.to_string(),
        }
    }
}

#[derive(Default)]
struct PageState {
    current: FakeDocument,
    sites: HashMap<String, FakeDocument>,
    focused: Option<usize>,
    navigation_failures: usize,
    batch_failures: usize,
}

/// A `Page` over `FakeDocument`s. Path expressions are evaluated with the
/// crate's own parser against the flat element list.
#[derive(Default)]
pub struct FakePage {
    state: Mutex<PageState>,
    closed: AtomicBool,
    calls: Mutex<Vec<String>>,
    unsupported: Mutex<Vec<Capability>>,
    pub batch_probes: AtomicUsize,
    pub single_probes: AtomicUsize,
}

impl FakePage {
    pub fn new(start: FakeDocument) -> Arc<Self> {
        let page = Self::default();
        page.lock().current = start;
        Arc::new(page)
    }

    pub fn with_site(self: &Arc<Self>, doc: FakeDocument) -> Arc<Self> {
        self.lock().sites.insert(doc.url.clone(), doc);
        self.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    pub fn fail_navigations(&self, n: usize) {
        self.lock().navigation_failures = n;
    }

    pub fn fail_batches(&self, n: usize) {
        self.lock().batch_failures = n;
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self, capability: Capability) {
        self.unsupported.lock().unwrap().push(capability);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn url(&self) -> String {
        self.lock().current.url.clone()
    }

    pub fn value_of(&self, id: &str) -> Option<String> {
        let state = self.lock();
        state
            .current
            .elements
            .iter()
            .find(|e| e.attrs.get("id").map(String::as_str) == Some(id))
            .and_then(|e| e.attrs.get("value").cloned())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_open(&self) -> Result<(), PageError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PageError::Closed)
        } else {
            Ok(())
        }
    }

    fn load(&self, url: &str) -> Result<(), PageError> {
        let mut state = self.lock();
        let doc = state
            .sites
            .get(url)
            .cloned()
            .ok_or_else(|| PageError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))?;
        state.current = doc;
        state.focused = None;
        Ok(())
    }

    /// The single element an action would target, or a backend-style error.
    fn target(&self, path: &str) -> Result<usize, PageError> {
        let state = self.lock();
        let nodes = select(&state.current, path).map_err(|e| PageError::Script(e.to_string()))?;
        nodes
            .first()
            .copied()
            .ok_or_else(|| PageError::NotFound(path.to_string()))
    }

    fn probe(&self, selector: &str, limit: usize) -> Value {
        let state = self.lock();
        match select(&state.current, selector) {
            Ok(nodes) => {
                let visible = nodes.len() == 1 && state.current.elements[nodes[0]].visible;
                let matches: Vec<String> = nodes
                    .iter()
                    .take(limit)
                    .map(|&i| state.current.elements[i].outer_html())
                    .collect();
                json!({ "count": nodes.len(), "visible": visible, "matches": matches })
            }
            Err(e) => json!({ "count": 0, "visible": false, "matches": [], "error": format!("SyntaxError: {e}") }),
        }
    }
}

#[async_trait]
impl Page for FakePage {
    fn supports(&self, capability: Capability) -> bool {
        !self.unsupported.lock().unwrap().contains(&capability)
    }

    async fn navigate(&self, url: &str, wait_until: WaitUntil, _timeout: Duration) -> Result<(), PageError> {
        self.check_open()?;
        self.record(format!("navigate {url} {wait_until:?}"));
        {
            let mut state = self.lock();
            if state.navigation_failures > 0 {
                state.navigation_failures -= 1;
                return Err(PageError::Navigation("net::ERR_CONNECTION_RESET".into()));
            }
        }
        self.load(url)
    }

    async fn reload(&self) -> Result<(), PageError> {
        self.check_open()?;
        self.record("reload".into());
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<(), PageError> {
        self.check_open()?;
        self.record("clear_cookies".into());
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), PageError> {
        self.check_open()?;
        self.record(format!("headers {}", headers.len()));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, PageError> {
        self.check_open()?;
        Ok(self.url())
    }

    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, PageError> {
        self.check_open()?;
        if script == scripts::EXTRACT_ELEMENTS {
            let state = self.lock();
            let elements: Vec<Value> = state.current.elements.iter().map(FakeElement::describe).collect();
            return Ok(json!({ "elements": elements, "framework": null }));
        }
        if script == scripts::MAIN_CONTENT {
            return Ok(json!(self.lock().current.main_text));
        }
        if script == scripts::FOCUSED_ELEMENT {
            let state = self.lock();
            return Ok(match state.focused {
                Some(i) => state.current.elements[i].describe(),
                None => Value::Null,
            });
        }
        if script == scripts::PROBE_BATCH {
            self.batch_probes.fetch_add(1, Ordering::SeqCst);
            {
                let mut state = self.lock();
                if state.batch_failures > 0 {
                    state.batch_failures -= 1;
                    return Err(PageError::Script("Execution context was destroyed".into()));
                }
            }
            let selectors = args["selectors"].as_array().cloned().unwrap_or_default();
            let results: Vec<Value> = selectors
                .iter()
                .map(|s| {
                    let mut probe = self.probe(s.as_str().unwrap_or_default(), 0);
                    if let Some(map) = probe.as_object_mut() {
                        map.remove("matches");
                    }
                    probe
                })
                .collect();
            return Ok(Value::Array(results));
        }
        if script == scripts::DESCRIBE_MATCHES {
            self.single_probes.fetch_add(1, Ordering::SeqCst);
            let limit = args["limit"].as_u64().unwrap_or(0) as usize;
            return Ok(self.probe(args["selector"].as_str().unwrap_or_default(), limit));
        }
        if script == scripts::HIGHLIGHT {
            let selector = args["selector"].as_str().unwrap_or_default();
            self.record(format!("highlight {selector}"));
            let count = select(&self.lock().current, selector).map(|n| n.len()).unwrap_or(0);
            return Ok(json!({ "count": count }));
        }
        if script == scripts::READY_STATE {
            return Ok(json!("complete"));
        }
        Err(PageError::Script("ReferenceError: unknown script".into()))
    }

    async fn click(&self, path: &str) -> Result<(), PageError> {
        self.check_open()?;
        let target = self.target(path)?;
        self.record(format!("click {path}"));
        let opens = self.lock().current.elements[target].opens.clone();
        if let Some(url) = opens {
            self.load(&url)?;
        }
        Ok(())
    }

    async fn type_text(&self, path: &str, text: &str) -> Result<(), PageError> {
        self.check_open()?;
        let target = self.target(path)?;
        self.record(format!("type {path} {text}"));
        let mut state = self.lock();
        state.current.elements[target].attrs.insert("value".into(), text.to_string());
        state.focused = Some(target);
        Ok(())
    }

    async fn submit(&self, path: &str) -> Result<(), PageError> {
        self.check_open()?;
        let target = self.target(path)?;
        self.record(format!("submit {path}"));
        let next = self.lock().current.elements[target].submits_to.clone();
        if let Some(url) = next {
            self.load(&url)?;
        }
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PageError> {
        self.check_open()?;
        self.record(format!("click_at {x} {y}"));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        self.check_open()?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

/// Indices of the elements `path` selects, in document order.
pub fn select(doc: &FakeDocument, path: &str) -> Result<Vec<usize>, xpath::XPathError> {
    let expr = xpath::parse(path)?;
    let value = eval(doc, &expr, &Ctx { node: None, position: 1, size: 1 });
    Ok(match value {
        XValue::Nodes(nodes) => nodes.into_iter().flatten().collect(),
        _ => Vec::new(),
    })
}

/// `None` is the document root; elements are its direct children.
type Node = Option<usize>;

#[derive(Debug, Clone)]
enum XValue {
    Nodes(Vec<Node>),
    Strings(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

struct Ctx {
    node: Node,
    position: usize,
    size: usize,
}

fn node_string(doc: &FakeDocument, node: Node) -> String {
    match node {
        Some(i) => doc.elements[i].text.clone(),
        None => doc.elements.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join(" "),
    }
}

fn strings(doc: &FakeDocument, value: &XValue) -> Vec<String> {
    match value {
        XValue::Nodes(nodes) => nodes.iter().map(|&n| node_string(doc, n)).collect(),
        XValue::Strings(s) => s.clone(),
        other => vec![to_string(doc, other)],
    }
}

fn to_string(doc: &FakeDocument, value: &XValue) -> String {
    match value {
        XValue::Nodes(_) | XValue::Strings(_) => strings(doc, value).into_iter().next().unwrap_or_default(),
        XValue::Str(s) => s.clone(),
        XValue::Num(n) if n.fract() == 0.0 => format!("{}", *n as i64),
        XValue::Num(n) => n.to_string(),
        XValue::Bool(b) => b.to_string(),
    }
}

fn to_bool(value: &XValue) -> bool {
    match value {
        XValue::Nodes(n) => !n.is_empty(),
        XValue::Strings(s) => !s.is_empty(),
        XValue::Str(s) => !s.is_empty(),
        XValue::Num(n) => *n != 0.0 && !n.is_nan(),
        XValue::Bool(b) => *b,
    }
}

fn to_num(doc: &FakeDocument, value: &XValue) -> f64 {
    match value {
        XValue::Num(n) => *n,
        XValue::Bool(b) => f64::from(u8::from(*b)),
        other => to_string(doc, other).trim().parse().unwrap_or(f64::NAN),
    }
}

fn eval(doc: &FakeDocument, expr: &Expr, ctx: &Ctx) -> XValue {
    match expr {
        Expr::Or(a, b) => XValue::Bool(to_bool(&eval(doc, a, ctx)) || to_bool(&eval(doc, b, ctx))),
        Expr::And(a, b) => XValue::Bool(to_bool(&eval(doc, a, ctx)) && to_bool(&eval(doc, b, ctx))),
        Expr::Compare(a, op, b) => XValue::Bool(compare(doc, &eval(doc, a, ctx), *op, &eval(doc, b, ctx))),
        Expr::Arith(a, op, b) => {
            let (a, b) = (to_num(doc, &eval(doc, a, ctx)), to_num(doc, &eval(doc, b, ctx)));
            XValue::Num(match op {
                xpath::ArithOp::Add => a + b,
                xpath::ArithOp::Sub => a - b,
                xpath::ArithOp::Mul => a * b,
                xpath::ArithOp::Div => a / b,
                xpath::ArithOp::Mod => a % b,
            })
        }
        Expr::Negate(a) => XValue::Num(-to_num(doc, &eval(doc, a, ctx))),
        Expr::Union(a, b) => match (eval(doc, a, ctx), eval(doc, b, ctx)) {
            (XValue::Nodes(mut x), XValue::Nodes(y)) => {
                x.extend(y);
                x.sort();
                x.dedup();
                XValue::Nodes(x)
            }
            _ => XValue::Nodes(Vec::new()),
        },
        Expr::Path(path) => {
            let start = if path.absolute { vec![None] } else { vec![ctx.node] };
            apply_steps(doc, start, &path.steps)
        }
        Expr::Filter {
            primary,
            predicates,
            steps,
        } => match eval(doc, primary, ctx) {
            XValue::Nodes(nodes) => {
                let filtered = apply_predicates(doc, nodes, predicates);
                apply_steps(doc, filtered, steps)
            }
            other => other,
        },
        Expr::Literal(s) => XValue::Str(s.clone()),
        Expr::Number(n) => XValue::Num(*n),
        Expr::Call { name, args } => call(doc, name, args, ctx),
    }
}

fn compare(doc: &FakeDocument, a: &XValue, op: CompareOp, b: &XValue) -> bool {
    let numeric = matches!(a, XValue::Num(_)) || matches!(b, XValue::Num(_));
    let (left, right) = (strings(doc, a), strings(doc, b));
    left.iter().any(|l| {
        right.iter().any(|r| match op {
            CompareOp::Eq if !numeric => l == r,
            CompareOp::NotEq if !numeric => l != r,
            _ => {
                let (l, r) = (l.trim().parse::<f64>().unwrap_or(f64::NAN), r.trim().parse::<f64>().unwrap_or(f64::NAN));
                match op {
                    CompareOp::Eq => l == r,
                    CompareOp::NotEq => l != r,
                    CompareOp::Lt => l < r,
                    CompareOp::Le => l <= r,
                    CompareOp::Gt => l > r,
                    CompareOp::Ge => l >= r,
                }
            }
        })
    })
}

fn call(doc: &FakeDocument, name: &str, args: &[Expr], ctx: &Ctx) -> XValue {
    let arg = |i: usize| args.get(i).map(|a| eval(doc, a, ctx));
    let text = |i: usize| match arg(i) {
        Some(v) => to_string(doc, &v),
        None => node_string(doc, ctx.node),
    };
    match name {
        "contains" => XValue::Bool(text(0).contains(&text(1))),
        "starts-with" => XValue::Bool(text(0).starts_with(&text(1))),
        "concat" => XValue::Str((0..args.len()).map(text).collect()),
        "normalize-space" => XValue::Str(text(0).split_whitespace().collect::<Vec<_>>().join(" ")),
        "translate" => {
            let (from, to): (Vec<char>, Vec<char>) = (text(1).chars().collect(), text(2).chars().collect());
            XValue::Str(
                text(0)
                    .chars()
                    .filter_map(|c| match from.iter().position(|f| *f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect(),
            )
        }
        "string" => XValue::Str(text(0)),
        "string-length" => XValue::Num(text(0).chars().count() as f64),
        "not" => XValue::Bool(!arg(0).as_ref().is_some_and(to_bool)),
        "true" => XValue::Bool(true),
        "false" => XValue::Bool(false),
        "position" => XValue::Num(ctx.position as f64),
        "last" => XValue::Num(ctx.size as f64),
        "count" => XValue::Num(match arg(0) {
            Some(XValue::Nodes(n)) => n.len() as f64,
            Some(XValue::Strings(s)) => s.len() as f64,
            _ => 0.0,
        }),
        _ => XValue::Bool(false),
    }
}

fn apply_steps(doc: &FakeDocument, mut nodes: Vec<Node>, steps: &[Step]) -> XValue {
    for (i, step) in steps.iter().enumerate() {
        if step.descendant {
            nodes = descendants_or_self(doc, &nodes);
        }
        if step.axis == Axis::Attribute {
            let name = match &step.test {
                NodeTest::Name(n) => Some(n.as_str()),
                _ => None,
            };
            let values = nodes
                .iter()
                .flatten()
                .flat_map(|&n| {
                    let attrs = &doc.elements[n].attrs;
                    match name {
                        Some(name) => attrs.get(name).cloned().into_iter().collect::<Vec<_>>(),
                        None => attrs.values().cloned().collect(),
                    }
                })
                .collect();
            return if i + 1 == steps.len() {
                XValue::Strings(values)
            } else {
                XValue::Nodes(Vec::new())
            };
        }
        if step.test == NodeTest::Text {
            let values = nodes
                .iter()
                .map(|&n| node_string(doc, n))
                .filter(|s| !s.is_empty())
                .collect();
            return XValue::Strings(values);
        }

        let mut next = Vec::new();
        for &node in &nodes {
            let candidates: Vec<Node> = axis_nodes(doc, node, step.axis)
                .into_iter()
                .filter(|&n| matches_test(doc, n, &step.test))
                .collect();
            next.extend(apply_predicates(doc, candidates, &step.predicates));
        }
        next.sort();
        next.dedup();
        nodes = next;
    }
    XValue::Nodes(nodes)
}

fn apply_predicates(doc: &FakeDocument, mut nodes: Vec<Node>, predicates: &[Expr]) -> Vec<Node> {
    for predicate in predicates {
        let size = nodes.len();
        nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(i, node)| {
                let ctx = Ctx {
                    node: *node,
                    position: i + 1,
                    size,
                };
                match eval(doc, predicate, &ctx) {
                    XValue::Num(n) => n == (i + 1) as f64,
                    other => to_bool(&other),
                }
            })
            .map(|(_, node)| node)
            .collect();
    }
    nodes
}

fn descendants_or_self(doc: &FakeDocument, nodes: &[Node]) -> Vec<Node> {
    let mut out = Vec::new();
    for &node in nodes {
        out.push(node);
        if node.is_none() {
            out.extend((0..doc.elements.len()).map(Some));
        }
    }
    out.sort();
    out.dedup();
    out
}

fn axis_nodes(doc: &FakeDocument, node: Node, axis: Axis) -> Vec<Node> {
    let all = || (0..doc.elements.len()).map(Some).collect::<Vec<_>>();
    match (axis, node) {
        (Axis::Child | Axis::Descendant, None) => all(),
        (Axis::DescendantOrSelf, None) => descendants_or_self(doc, &[None]),
        (Axis::SelfNode | Axis::DescendantOrSelf | Axis::AncestorOrSelf, n) => vec![n],
        (Axis::Parent | Axis::Ancestor, Some(_)) => vec![None],
        (Axis::FollowingSibling | Axis::Following, Some(i)) => ((i + 1)..doc.elements.len()).map(Some).collect(),
        (Axis::PrecedingSibling | Axis::Preceding, Some(i)) => (0..i).rev().map(Some).collect(),
        _ => Vec::new(),
    }
}

fn matches_test(doc: &FakeDocument, node: Node, test: &NodeTest) -> bool {
    match (test, node) {
        (NodeTest::Node, _) => true,
        (NodeTest::Any, Some(_)) => true,
        (NodeTest::Name(name), Some(i)) => doc.elements[i].tag.eq_ignore_ascii_case(name),
        _ => false,
    }
}

/// Replies handed out in order. Runs out with a failure marker.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelReply, ModelError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ModelReply, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text("TASK FAILED: no more scripted replies")))
    }
}

pub fn tool_call(name: &str, arguments: Value) -> Result<ModelReply, ModelError> {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    let id = format!("call_{}", NEXT.fetch_add(1, Ordering::SeqCst));
    Ok(ModelReply {
        content: None,
        tool_calls: vec![ToolCall::new(id, name, arguments.to_string())],
    })
}

pub fn text(content: &str) -> ModelReply {
    ModelReply {
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
    }
}

/// Search page used by several tests.
pub fn search_home() -> FakeDocument {
    FakeDocument::new(
        "https://search.example/",
        "Search the example web",
        vec![
            FakeElement::new("input")
                .attr("id", "q")
                .attr("name", "q")
                .attr("placeholder", "Search")
                .submits_to("https://search.example/results?q=rust"),
            FakeElement::new("button").attr("aria-label", "Search").text("Go"),
            FakeElement::new("a").attr("href", "/about").text("About"),
            FakeElement::new("a").attr("href", "/privacy-policy").text("Privacy"),
        ],
    )
}

pub fn search_results() -> FakeDocument {
    FakeDocument::new(
        "https://search.example/results?q=rust",
        "Results for rust",
        vec![
            FakeElement::new("h2").text("Results"),
            FakeElement::new("a").attr("href", "https://www.rust-lang.org/").text("Rust Programming Language"),
            FakeElement::new("a").attr("href", "https://doc.rust-lang.org/book/").text("The Rust Book"),
            FakeElement::new("button").text("Next"),
            FakeElement::new("button").text("Next"),
        ],
    )
}

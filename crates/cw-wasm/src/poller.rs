//! The content-script driver: timers, observers, and the engine bridge.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    console, Document, Element, MutationObserver, MutationObserverInit, MutationRecord, Node,
    Window,
};

use cw_core::collect::{AttrKind, ModeChange, Mutation};
use cw_core::config::{PollerConfig, STYLE_GUARD_INTERVAL_MS, WAIT_FOR_BODY_INTERVAL_MS};
use cw_core::engine::{SelectorQuery, SelectorRequest, SelectorResponse};
use cw_core::session::{PollerSession, SessionUpdate};
use cw_core::timing::Millis;

use crate::dom::WebDom;

struct Inner {
    session: RefCell<PollerSession<WebDom>>,
    window: Window,
    document: Document,
    security_token: String,
    /// Host-supplied `(query) => Promise<response>` bridge to the native
    /// engine.
    query_engine: Function,
    poll_interval_ms: Millis,
    first_delay_ms: Option<Millis>,
    style_element: RefCell<Option<Element>>,
    observer: RefCell<Option<MutationObserver>>,
    // Long-lived callbacks must outlive their JS registrations.
    observer_callback: RefCell<Option<Closure<dyn FnMut(Array, MutationObserver)>>>,
    poll_interval_id: RefCell<Option<i32>>,
    poll_tick_callback: RefCell<Option<Closure<dyn FnMut()>>>,
    guard_callback: RefCell<Option<Closure<dyn FnMut()>>>,
    body_wait_id: RefCell<Option<i32>>,
    body_wait_callback: RefCell<Option<Closure<dyn FnMut()>>>,
}

/// One selector poller per page context.
#[wasm_bindgen]
pub struct SelectorPoller {
    inner: Rc<Inner>,
}

#[wasm_bindgen]
impl SelectorPoller {
    /// `config` is the injection-time argument object (camelCase, see
    /// `PollerConfig`); `query_engine` receives the outbound selector query
    /// and must return a Promise resolving to the engine response (or a
    /// falsy value for "no selectors").
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        source_url: String,
        security_token: String,
        query_engine: Function,
    ) -> Result<SelectorPoller, JsValue> {
        let config: PollerConfig = serde_wasm_bindgen::from_value(config)
            .map_err(|e| JsValue::from_str(&format!("invalid poller config: {e}")))?;
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;

        let poll_interval_ms = config.polling_interval_ms();
        let first_delay_ms = config.first_selectors_polling_delay_ms;
        let session = PollerSession::new(WebDom::new(document.clone()), source_url, config);

        Ok(SelectorPoller {
            inner: Rc::new(Inner {
                session: RefCell::new(session),
                window,
                document,
                security_token,
                query_engine,
                poll_interval_ms,
                first_delay_ms,
                style_element: RefCell::new(None),
                observer: RefCell::new(None),
                observer_callback: RefCell::new(None),
                poll_interval_id: RefCell::new(None),
                poll_tick_callback: RefCell::new(None),
                guard_callback: RefCell::new(None),
                body_wait_id: RefCell::new(None),
                body_wait_callback: RefCell::new(None),
            }),
        })
    }

    /// Start the poller, waiting for `document.body` first if necessary.
    pub fn run(&self) {
        let inner = self.inner.clone();
        if inner.document.body().is_some() {
            begin(&inner);
            return;
        }

        let wait_inner = inner.clone();
        let closure = Closure::wrap(Box::new(move || {
            if wait_inner.document.body().is_none() {
                return;
            }
            if let Some(id) = wait_inner.body_wait_id.borrow_mut().take() {
                wait_inner.window.clear_interval_with_handle(id);
            }
            begin(&wait_inner);
        }) as Box<dyn FnMut()>);

        match inner.window.set_interval_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            WAIT_FOR_BODY_INTERVAL_MS as i32,
        ) {
            Ok(id) => {
                *inner.body_wait_id.borrow_mut() = Some(id);
                *inner.body_wait_callback.borrow_mut() = Some(closure);
            }
            Err(err) => console::warn_1(&err),
        }
    }
}

fn now_ms(inner: &Inner) -> Millis {
    inner
        .window
        .performance()
        .map(|p| p.now() as Millis)
        .unwrap_or(0)
}

fn begin(inner: &Rc<Inner>) {
    let Some(body) = inner.document.body() else {
        return;
    };
    // An editable document is being authored, not read; leave it alone.
    if body.content_editable() == "true" {
        return;
    }

    create_stylesheet(inner);

    match inner.first_delay_ms {
        Some(delay) => {
            let cb = inner.clone();
            schedule_timeout(inner, delay, move || start_observing(&cb));
        }
        None => start_observing(inner),
    }
}

fn start_observing(inner: &Rc<Inner>) {
    let now = now_ms(inner);
    let update = inner.session.borrow_mut().start(now);
    if !inner.session.borrow().config().generic_hide {
        install_observer(inner);
    }
    handle_update(inner, update);
}

fn handle_update(inner: &Rc<Inner>, update: SessionUpdate) {
    if let Some(request) = update.fetch {
        dispatch_fetch(inner.clone(), request);
    }

    if let Some(retry_at) = update.fetch_retry_at {
        let cb = inner.clone();
        let delay = retry_at.saturating_sub(now_ms(inner));
        schedule_timeout(inner, delay, move || {
            let now = now_ms(&cb);
            let update = cb.session.borrow_mut().on_fetch_retry(now);
            handle_update(&cb, update);
        });
    }

    match update.mode_change {
        Some(ModeChange::SwitchToPolling) => switch_to_polling(inner),
        Some(ModeChange::ResumeObserving) => resume_observing(inner),
        None => {}
    }

    if let Some(pump_at) = update.pump_at {
        schedule_pump(inner, pump_at);
    }

    render_if_dirty(inner);
}

fn dispatch_fetch(inner: Rc<Inner>, request: SelectorRequest) {
    wasm_bindgen_futures::spawn_local(async move {
        let query = SelectorQuery {
            security_token: inner.security_token.clone(),
            data: request,
        };
        let response = match serde_wasm_bindgen::to_value(&query) {
            Ok(payload) => await_engine(&inner.query_engine, payload).await,
            Err(_) => None,
        };

        let now = now_ms(&inner);
        let update = inner.session.borrow_mut().apply_fetch_response(response, now);
        handle_update(&inner, update);
    });
}

/// Any transport failure, rejection, or falsy result is "no selectors".
async fn await_engine(engine: &Function, payload: JsValue) -> Option<SelectorResponse> {
    let value = engine.call1(&JsValue::NULL, &payload).ok()?;
    let promise = value.dyn_into::<Promise>().ok()?;
    let result = JsFuture::from(promise).await.ok()?;
    if result.is_falsy() {
        return None;
    }
    serde_wasm_bindgen::from_value::<SelectorResponse>(result).ok()
}

fn schedule_pump(inner: &Rc<Inner>, pump_at: Millis) {
    let cb = inner.clone();
    let delay = pump_at.saturating_sub(now_ms(inner));
    schedule_timeout(inner, delay, move || run_pump(&cb));
}

fn run_pump(inner: &Rc<Inner>) {
    let now = now_ms(inner);
    let schedule = inner.session.borrow_mut().pump(now);
    if let Some(cooldown_until) = schedule.cooldown_until {
        let cb = inner.clone();
        schedule_timeout(inner, cooldown_until.saturating_sub(now), move || {
            let now = now_ms(&cb);
            if let Some(next_pump) = cb.session.borrow_mut().cooldown_over(now) {
                schedule_pump(&cb, next_pump);
            }
        });
    }
    render_if_dirty(inner);
}

fn install_observer(inner: &Rc<Inner>) {
    let cb = inner.clone();
    let closure = Closure::wrap(Box::new(move |records: Array, _observer: MutationObserver| {
        on_mutation_records(&cb, records);
    }) as Box<dyn FnMut(Array, MutationObserver)>);

    match MutationObserver::new(closure.as_ref().unchecked_ref()) {
        Ok(observer) => {
            let init = MutationObserverInit::new();
            init.set_subtree(true);
            init.set_child_list(true);
            let filter = Array::of2(&"id".into(), &"class".into());
            init.set_attribute_filter(&filter);

            if let Some(root) = inner.document.document_element() {
                if observer.observe_with_options(&root, &init).is_err() {
                    console::warn_1(&"cloakwork: failed to observe document".into());
                }
            }
            *inner.observer.borrow_mut() = Some(observer);
            *inner.observer_callback.borrow_mut() = Some(closure);
        }
        Err(err) => console::warn_1(&err),
    }
}

fn on_mutation_records(inner: &Rc<Inner>, records: Array) {
    let mut batch: Vec<Mutation<Element>> = Vec::new();
    for value in records.iter() {
        let record: MutationRecord = value.unchecked_into();
        match record.type_().as_str() {
            "attributes" => {
                let Some(target) = record.target() else {
                    continue;
                };
                let Ok(element) = target.dyn_into::<Element>() else {
                    continue;
                };
                let kind = match record.attribute_name().as_deref() {
                    Some("id") => AttrKind::Id,
                    Some("class") => AttrKind::Class,
                    _ => continue,
                };
                batch.push(Mutation::Attribute {
                    target: element,
                    kind,
                });
            }
            "childList" => {
                let nodes = record.added_nodes();
                let mut added = Vec::new();
                for index in 0..nodes.length() {
                    if let Some(node) = nodes.get(index) {
                        if let Ok(element) = node.dyn_into::<Element>() {
                            added.push(element);
                        }
                    }
                }
                if !added.is_empty() {
                    batch.push(Mutation::ChildList { added });
                }
            }
            _ => {}
        }
    }

    if batch.is_empty() {
        return;
    }
    let now = now_ms(inner);
    let update = inner.session.borrow_mut().on_mutations(&batch, now);
    handle_update(inner, update);
}

fn switch_to_polling(inner: &Rc<Inner>) {
    if let Some(observer) = inner.observer.borrow_mut().take() {
        observer.disconnect();
    }
    inner.observer_callback.borrow_mut().take();

    let cb = inner.clone();
    let closure = Closure::wrap(Box::new(move || {
        let now = now_ms(&cb);
        let update = cb.session.borrow_mut().on_poll_tick(now);
        handle_update(&cb, update);
    }) as Box<dyn FnMut()>);

    match inner.window.set_interval_with_callback_and_timeout_and_arguments_0(
        closure.as_ref().unchecked_ref(),
        inner.poll_interval_ms as i32,
    ) {
        Ok(id) => {
            *inner.poll_interval_id.borrow_mut() = Some(id);
            *inner.poll_tick_callback.borrow_mut() = Some(closure);
        }
        Err(err) => console::warn_1(&err),
    }
}

fn resume_observing(inner: &Rc<Inner>) {
    if let Some(id) = inner.poll_interval_id.borrow_mut().take() {
        inner.window.clear_interval_with_handle(id);
    }
    inner.poll_tick_callback.borrow_mut().take();
    install_observer(inner);
}

fn create_stylesheet(inner: &Rc<Inner>) {
    let Some(body) = inner.document.body() else {
        return;
    };
    let element = match inner.document.create_element("style") {
        Ok(element) => element,
        Err(err) => {
            console::warn_1(&err);
            return;
        }
    };
    let _ = element.set_attribute("type", "text/css");
    let _ = body.append_child(&element);
    *inner.style_element.borrow_mut() = Some(element);

    // Pages love to append their own nodes (and some fight to be last);
    // keep our sheet at the bottom so its rules win the cascade.
    let cb = inner.clone();
    let closure = Closure::wrap(Box::new(move || {
        ensure_style_last(&cb);
    }) as Box<dyn FnMut()>);
    if inner
        .window
        .set_interval_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            STYLE_GUARD_INTERVAL_MS as i32,
        )
        .is_ok()
    {
        *inner.guard_callback.borrow_mut() = Some(closure);
    }
}

fn ensure_style_last(inner: &Rc<Inner>) {
    let style_ref = inner.style_element.borrow();
    let Some(style) = style_ref.as_ref() else {
        return;
    };
    let Some(body) = inner.document.body() else {
        return;
    };

    let body_node: &Node = body.unchecked_ref();
    let parent_is_body = style
        .parent_element()
        .map(|parent| {
            let parent_node: &Node = parent.unchecked_ref();
            parent_node.is_same_node(Some(body_node))
        })
        .unwrap_or(false);
    if parent_is_body && style.next_element_sibling().is_none() {
        return;
    }
    // appendChild relocates the node, re-parenting included.
    let _ = body.append_child(style);
}

fn render_if_dirty(inner: &Rc<Inner>) {
    let mut session = inner.session.borrow_mut();
    if !session.take_stylesheet_dirty() {
        return;
    }
    let text = session.stylesheet_text();
    drop(session);

    if let Some(style) = inner.style_element.borrow().as_ref() {
        style.set_text_content(Some(&text));
    }
}

fn schedule_timeout(inner: &Rc<Inner>, delay_ms: Millis, task: impl FnOnce() + 'static) {
    let callback = Closure::once_into_js(task);
    if inner
        .window
        .set_timeout_with_callback_and_timeout_and_arguments_0(
            callback.unchecked_ref(),
            delay_ms as i32,
        )
        .is_err()
    {
        console::warn_1(&"cloakwork: failed to schedule timer".into());
    }
}

//! Wake-up primitives available to wasm code in browsers, workers and Node.

use asap_scheduler::{Callback, Mechanism, WakeReason, WakeUp};
use js_sys::{Function, Object, Reflect};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Element, MessageChannel, MutationObserver, MutationObserverInit};

/// Outstanding callbacks, for primitives whose JS handler is installed once.
///
/// Mutation records are batched, so one handler call may answer several
/// requests. Callbacks requested while the handler runs wait for the next one.
type Slot = Rc<RefCell<VecDeque<Callback>>>;

fn handler(slot: &Slot) -> Closure<dyn FnMut()> {
    let slot = slot.clone();
    Closure::new(move || {
        let due = std::mem::take(&mut *slot.borrow_mut());
        for callback in due {
            callback();
        }
    })
}

fn property(target: &JsValue, name: &str) -> Option<JsValue> {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn function(target: &JsValue, name: &str) -> Option<Function> {
    property(target, name)?.dyn_into::<Function>().ok()
}

fn once(callback: Callback) -> JsValue {
    Closure::once_into_js(move || callback())
}

fn check<T>(primitive: &'static str, result: Result<T, JsValue>) {
    if let Err(error) = result {
        tracing::error!(primitive, error = ?error, "wake-up request failed");
    }
}

/// `process.nextTick` under Node, with `setImmediate` for recovery requests.
///
/// Ticks queued from inside a tick run before the event loop gets back to
/// I/O, so a flush that is recovering from a panic goes through
/// `setImmediate` instead.
pub struct NodeTick {
    process: JsValue,
    next_tick: Function,
    set_immediate: Option<Function>,
}

impl NodeTick {
    pub fn detect() -> Option<Self> {
        let global: JsValue = js_sys::global().into();
        let process = property(&global, "process")?;
        // Test runners and bundler shims define a `process` too.
        if String::from(Object::to_string(process.unchecked_ref::<Object>())) != "[object process]" {
            return None;
        }
        let next_tick = function(&process, "nextTick")?;
        let set_immediate = function(&global, "setImmediate");
        Some(Self {
            process,
            next_tick,
            set_immediate,
        })
    }
}

impl WakeUp for NodeTick {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Immediate
    }

    fn request(&self, callback: Callback, reason: WakeReason) {
        let callback = once(callback);
        match (&self.set_immediate, reason) {
            (Some(set_immediate), WakeReason::Recovering) => check(
                "setImmediate",
                set_immediate.call1(&JsValue::UNDEFINED, &callback),
            ),
            _ => check(
                "process.nextTick",
                self.next_tick.call1(&self.process, &callback),
            ),
        }
    }
}

/// Flushes from a `MutationObserver` watching a detached element.
pub struct MutationWake {
    observer: MutationObserver,
    element: Element,
    toggle: Cell<bool>,
    slot: Slot,
    _handler: Closure<dyn FnMut()>,
}

impl MutationWake {
    pub fn detect() -> Option<Self> {
        let document = web_sys::window()?.document()?;
        let slot = Slot::default();
        let handler = handler(&slot);

        let observer = MutationObserver::new(handler.as_ref().unchecked_ref()).ok()?;
        let element = document.create_element("div").ok()?;
        let init = MutationObserverInit::new();
        init.set_attributes(true);
        observer.observe_with_options(&element, &init).ok()?;

        Some(Self {
            observer,
            element,
            toggle: Cell::new(false),
            slot,
            _handler: handler,
        })
    }
}

impl WakeUp for MutationWake {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Mutation
    }

    fn request(&self, callback: Callback, _reason: WakeReason) {
        self.slot.borrow_mut().push_back(callback);
        let value = if self.toggle.replace(!self.toggle.get()) {
            "1"
        } else {
            "0"
        };
        check(
            "MutationObserver",
            self.element.set_attribute("data-asap-flush", value),
        );
    }
}

impl Drop for MutationWake {
    fn drop(&mut self) {
        self.observer.disconnect();
    }
}

/// Flushes when a message posted to one end of a `MessageChannel` arrives at
/// the other.
pub struct MessageWake {
    channel: MessageChannel,
    slot: Slot,
    _handler: Closure<dyn FnMut()>,
}

impl MessageWake {
    pub fn detect() -> Option<Self> {
        let channel = MessageChannel::new().ok()?;
        let slot = Slot::default();
        let handler = handler(&slot);
        channel
            .port1()
            .set_onmessage(Some(handler.as_ref().unchecked_ref()));

        Some(Self {
            channel,
            slot,
            _handler: handler,
        })
    }
}

impl WakeUp for MessageWake {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Message
    }

    fn request(&self, callback: Callback, _reason: WakeReason) {
        self.slot.borrow_mut().push_back(callback);
        // Some engines reject a message without a payload.
        check(
            "MessageChannel",
            self.channel.port2().post_message(&JsValue::from(0)),
        );
    }
}

impl Drop for MessageWake {
    fn drop(&mut self) {
        let port = self.channel.port1();
        port.set_onmessage(None);
        port.close();
        self.channel.port2().close();
    }
}

/// `setTimeout(callback, 0)`, present in every JS environment.
pub struct Timeout {
    global: JsValue,
    set_timeout: Function,
}

impl Timeout {
    pub fn detect() -> Option<Self> {
        let global: JsValue = js_sys::global().into();
        let set_timeout = function(&global, "setTimeout")?;
        Some(Self {
            global,
            set_timeout,
        })
    }

    /// Runs a JS function on a later macrotask.
    pub fn defer(&self, f: &JsValue) -> Result<(), JsValue> {
        self.set_timeout
            .call2(&self.global, f, &JsValue::from(0))
            .map(drop)
    }
}

impl WakeUp for Timeout {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Timer
    }

    fn request(&self, callback: Callback, _reason: WakeReason) {
        check("setTimeout", self.defer(&once(callback)));
    }
}

fn boxed(wake: impl WakeUp + 'static) -> Box<dyn WakeUp> {
    Box::new(wake)
}

pub(crate) fn detect_node_tick() -> Option<Box<dyn WakeUp>> {
    NodeTick::detect().map(boxed)
}

pub(crate) fn detect_mutation() -> Option<Box<dyn WakeUp>> {
    MutationWake::detect().map(boxed)
}

pub(crate) fn detect_message() -> Option<Box<dyn WakeUp>> {
    MessageWake::detect().map(boxed)
}

pub(crate) fn detect_timeout() -> Option<Box<dyn WakeUp>> {
    Timeout::detect().map(boxed)
}

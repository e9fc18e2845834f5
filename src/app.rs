//! Application context and app surface.
//!
//! Only what the core requires: global component/directive registries,
//! app-level provides, global properties (the last tier of render-context
//! resolution), and the configured error handler. The app owns the
//! renderer and the root component's mount/unmount lifecycle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::component::{ComponentDef, Directive, Instance, Provides};
use crate::error::RuntimeError;
use crate::host::{HostBackend, HostId};
use crate::reactivity::Store;
use crate::renderer::Renderer;
use crate::value::Value;
use crate::vnode::VNode;

struct AppCtxInner {
    components: RefCell<HashMap<String, Rc<ComponentDef>>>,
    directives: RefCell<HashMap<String, Rc<Directive>>>,
    provides: Rc<Provides>,
    error_handler: RefCell<Option<Rc<dyn Fn(&RuntimeError)>>>,
    global_properties: Store,
}

/// Shared app context, inherited by every instance in the tree.
#[derive(Clone)]
pub struct AppContext {
    inner: Rc<AppCtxInner>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(AppCtxInner {
                components: RefCell::new(HashMap::new()),
                directives: RefCell::new(HashMap::new()),
                provides: Provides::root(),
                error_handler: RefCell::new(None),
                global_properties: Store::new(),
            }),
        }
    }

    pub fn component(&self, name: &str) -> Option<Rc<ComponentDef>> {
        self.inner.components.borrow().get(name).cloned()
    }

    pub fn directive(&self, name: &str) -> Option<Rc<Directive>> {
        self.inner.directives.borrow().get(name).cloned()
    }

    pub fn register_component(&self, name: &str, def: Rc<ComponentDef>) {
        self.inner.components.borrow_mut().insert(name.to_string(), def);
    }

    pub fn register_directive(&self, name: &str, directive: Rc<Directive>) {
        self.inner.directives.borrow_mut().insert(name.to_string(), directive);
    }

    pub fn provides(&self) -> Rc<Provides> {
        self.inner.provides.clone()
    }

    pub fn provide(&self, key: &str, value: Value) {
        self.inner.provides.set(key, value);
    }

    pub fn error_handler(&self) -> Option<Rc<dyn Fn(&RuntimeError)>> {
        self.inner.error_handler.borrow().clone()
    }

    pub fn set_error_handler(&self, handler: impl Fn(&RuntimeError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn global_properties(&self) -> Store {
        self.inner.global_properties.clone()
    }
}

/// An application: a root component bound to a renderer.
pub struct App<H: HostBackend + 'static> {
    context: AppContext,
    root_def: Rc<ComponentDef>,
    renderer: Rc<Renderer<H>>,
    root_vnode: RefCell<Option<VNode>>,
    container: Cell<Option<HostId>>,
}

/// Create an app for a root component over a host backend.
pub fn create_app<H: HostBackend + 'static>(root_def: Rc<ComponentDef>, host: H) -> App<H> {
    App {
        context: AppContext::new(),
        root_def,
        renderer: Renderer::new(host),
        root_vnode: RefCell::new(None),
        container: Cell::new(None),
    }
}

impl<H: HostBackend + 'static> App<H> {
    pub fn context(&self) -> AppContext {
        self.context.clone()
    }

    pub fn renderer(&self) -> Rc<Renderer<H>> {
        self.renderer.clone()
    }

    pub fn component(self, name: &str, def: Rc<ComponentDef>) -> Self {
        self.context.register_component(name, def);
        self
    }

    pub fn directive(self, name: &str, directive: Rc<Directive>) -> Self {
        self.context.register_directive(name, directive);
        self
    }

    pub fn provide(self, key: &str, value: Value) -> Self {
        self.context.provide(key, value);
        self
    }

    /// Mount the root component into a host container.
    pub fn mount(&self, container: HostId) -> Option<Instance> {
        if self.container.get().is_some() {
            tracing::warn!("app is already mounted");
            return None;
        }
        let vnode = VNode::component(self.root_def.clone(), None, None);
        self.renderer
            .render_with_context(Some(vnode.clone()), container, self.context.clone());
        self.container.set(Some(container));
        *self.root_vnode.borrow_mut() = Some(vnode.clone());
        let instance = vnode.borrow().instance.clone();
        instance
    }

    /// Resolve the container by selector, then mount.
    pub fn mount_selector(&self, selector: &str) -> Option<Instance> {
        let container = self.renderer.with_host(|host| host.query_selector(selector))?;
        self.mount(container)
    }

    /// Unmount the root and drain scheduler state owned by this tree.
    pub fn unmount(&self) {
        if let Some(container) = self.container.take() {
            self.renderer
                .render_with_context(None, container, self.context.clone());
            *self.root_vnode.borrow_mut() = None;
        }
    }
}

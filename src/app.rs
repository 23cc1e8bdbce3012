use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::mem;

use crate::dialog::{Confirmation, Picker, Prompt, Step, TransferForm};
use crate::exec::{Completion, DeleteDone, SanitizeDone, TransferDone};
use crate::flash::Flash;
use crate::forward::{ForwardExit, Forwarders};
use crate::model::{NamespaceScope, ResourceKind, TableData, UsageSnapshot};
use crate::transfer::{DEFAULT_TX_RETRIES, TransferRequest};
use crate::view::{BindEnv, DecorateEnv, ResourceViewer, ViewContext, pod};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Reload,
    Delete {
        kind: ResourceKind,
        paths: Vec<String>,
    },
    Sanitize {
        namespace: Option<String>,
    },
    Shell {
        path: String,
        container: Option<String>,
    },
    Attach {
        path: String,
        container: Option<String>,
    },
    PrepareTransfer {
        path: String,
    },
    Transfer {
        path: String,
        request: TransferRequest,
    },
    ShowNode {
        path: String,
    },
    Logs {
        path: String,
        container: Option<String>,
        previous: bool,
    },
    PortForward {
        path: String,
        local_port: u16,
        remote_port: u16,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Settings {
    pub read_only: bool,
    pub all_containers: bool,
    pub port_forward: bool,
    pub transfer_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_only: false,
            all_containers: false,
            port_forward: true,
            transfer_retries: DEFAULT_TX_RETRIES,
        }
    }
}

pub enum Dialog {
    Confirm(Confirmation<Option<AppCommand>>),
    Pick(Picker<AppCommand>),
    Prompt(Prompt<Result<AppCommand, String>>),
    Transfer(TransferForm),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Overlay {
    pub title: String,
    pub text: String,
    pub scroll: u16,
}

pub struct App {
    running: bool,
    cluster: String,
    context: String,
    namespace_scope: NamespaceScope,
    settings: Settings,
    views: Vec<ResourceViewer>,
    forwarders: Option<Forwarders>,
    usage: UsageSnapshot,
    flash: Flash,
    dialog: Option<Dialog>,
    overlay: Option<Overlay>,
    show_help: bool,
    table_page_size: usize,
    pending: Vec<AppCommand>,
}

impl App {
    pub fn new(
        cluster: String,
        context: String,
        namespace_scope: NamespaceScope,
        settings: Settings,
    ) -> Self {
        let env = BindEnv {
            read_only: settings.read_only,
        };
        Self {
            running: true,
            cluster,
            context,
            namespace_scope,
            settings,
            views: vec![pod::viewer(&env, ViewContext::default())],
            forwarders: settings.port_forward.then(Forwarders::default),
            usage: UsageSnapshot::default(),
            flash: Flash::default(),
            dialog: None,
            overlay: None,
            show_help: false,
            table_page_size: 10,
            pending: Vec::new(),
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn namespace_scope(&self) -> &NamespaceScope {
        &self.namespace_scope
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bind_env(&self) -> BindEnv {
        BindEnv {
            read_only: self.settings.read_only,
        }
    }

    pub fn views(&self) -> &[ResourceViewer] {
        &self.views
    }

    pub fn active_view(&self) -> Option<&ResourceViewer> {
        self.views.last()
    }

    pub fn active_view_mut(&mut self) -> Option<&mut ResourceViewer> {
        self.views.last_mut()
    }

    pub fn selected_path(&self) -> Option<String> {
        self.active_view().and_then(ResourceViewer::selected_path)
    }

    /// The namespace the active view is scoped to, if any.
    pub fn active_namespace(&self) -> Option<String> {
        self.active_view()
            .and_then(|view| view.context().namespace.clone())
            .or_else(|| self.namespace_scope.namespace().map(str::to_string))
    }

    pub fn queue(&mut self, command: AppCommand) {
        self.pending.push(command);
    }

    pub fn confirm(&mut self, confirmation: Confirmation<Option<AppCommand>>) {
        self.dialog = Some(Dialog::Confirm(confirmation));
    }

    pub fn open_picker(&mut self, picker: Picker<AppCommand>) {
        self.dialog = Some(Dialog::Pick(picker));
    }

    pub fn prompt(&mut self, prompt: Prompt<Result<AppCommand, String>>) {
        self.dialog = Some(Dialog::Prompt(prompt));
    }

    pub fn open_transfer(&mut self, form: TransferForm) {
        self.dialog = Some(Dialog::Transfer(form));
    }

    pub fn dialog(&self) -> Option<&Dialog> {
        self.dialog.as_ref()
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn flash(&self) -> &Flash {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut Flash {
        &mut self.flash
    }

    pub fn forwarders(&self) -> Option<&Forwarders> {
        self.forwarders.as_ref()
    }

    pub fn forwarders_mut(&mut self) -> Option<&mut Forwarders> {
        self.forwarders.as_mut()
    }

    fn with_active<R>(
        &mut self,
        apply: impl FnOnce(&mut ResourceViewer, &DecorateEnv<'_>) -> R,
    ) -> Option<R> {
        let env = DecorateEnv {
            forwarders: self.forwarders.as_ref(),
            usage: &self.usage,
        };
        let view = self.views.last_mut()?;
        Some(apply(view, &env))
    }

    pub fn mark_selected(&mut self) {
        if let Some(view) = self.active_view_mut() {
            view.toggle_mark();
            view.move_selection(1);
        }
    }

    pub fn clear_marks(&mut self) {
        if let Some(view) = self.active_view_mut() {
            view.clear_marks();
        }
    }

    pub fn sort_active(&mut self, column: &str, ascending: bool) {
        self.with_active(|view, env| view.sort_by(column, ascending, env));
    }

    pub fn redecorate_active(&mut self) {
        self.with_active(|view, env| view.redecorate(env));
    }

    pub fn push_view(&mut self, view: ResourceViewer) {
        self.views.push(view);
    }

    /// The root view is never popped.
    pub fn pop_view(&mut self) -> bool {
        if self.views.len() <= 1 {
            return false;
        }
        self.views.pop();
        true
    }

    pub fn set_active_data(&mut self, data: TableData) {
        self.with_active(|view, env| view.set_data(data, env));
    }

    pub fn set_active_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.with_active(|view, env| view.set_error(error, env));
    }

    pub fn set_usage(&mut self, usage: UsageSnapshot) {
        self.usage = usage;
        self.redecorate_active();
    }

    pub fn show_overlay(&mut self, title: impl Into<String>, text: String) {
        self.overlay = Some(Overlay {
            title: title.into(),
            text,
            scroll: 0,
        });
    }

    pub fn stop_active(&mut self) {
        if let Some(view) = self.active_view_mut() {
            view.stop();
        }
    }

    pub fn start_active(&mut self) {
        if let Some(view) = self.active_view_mut() {
            view.start();
        }
    }

    pub fn set_table_page_size(&mut self, rows: usize) {
        self.table_page_size = rows.max(1);
    }

    pub fn on_forward_exit(&mut self, exit: ForwardExit) {
        let Some(forwarders) = self.forwarders.as_mut() else {
            return;
        };
        // Stopped sessions were already removed by their owner.
        if forwarders.remove_by_pid(exit.pid).is_none() {
            return;
        }
        match exit.result {
            Ok(status) if status.success() => self
                .flash
                .info(format!("Port-forward {} on {} ended", exit.mapping, exit.path)),
            Ok(status) => self.flash.warn(format!(
                "Port-forward {} on {} exited with {status}",
                exit.mapping, exit.path
            )),
            Err(error) => self.flash.error(format!(
                "Port-forward {} on {} failed: {error}",
                exit.mapping, exit.path
            )),
        }
        self.redecorate_active();
    }

    /// Applies a background result. Returns true when the active view
    /// should reload.
    pub fn on_completion(&mut self, completion: Completion) -> bool {
        match completion {
            Completion::Transfer(done) => {
                self.on_transfer_done(done);
                false
            }
            Completion::Delete(done) => {
                self.on_delete_done(done);
                true
            }
            Completion::Sanitize(done) => {
                self.on_sanitize_done(done);
                true
            }
        }
    }

    fn on_delete_done(&mut self, done: DeleteDone) {
        for (path, result) in &done.results {
            match result {
                Ok(()) => {
                    if let Some(forwarders) = self.forwarders.as_mut() {
                        forwarders.delete_forwarder(path);
                    }
                }
                Err(error) => self
                    .flash
                    .error(format!("Delete failed for {path}: {error}")),
            }
            for view in self.views.iter_mut().filter(|view| view.kind() == done.kind) {
                view.delete_mark(path);
            }
        }
    }

    fn on_sanitize_done(&mut self, done: SanitizeDone) {
        match done.result {
            Ok(count) => self.flash.info(format!("Sanitized {count} pods")),
            Err(error) => self.flash.error(error),
        }
    }

    pub fn on_transfer_done(&mut self, done: TransferDone) {
        match done.result {
            Ok(()) => self.flash.info(format!(
                "{} successful on {}!",
                done.direction.label(),
                done.path
            )),
            Err(error) => self.flash.error(format!(
                "{} failed on {}: {error}",
                done.direction.label(),
                done.path
            )),
        }
    }

    /// Routes a key through the open dialog, the overlay, the active view's
    /// bindings and finally the global keys. Returns the queued commands.
    pub fn handle_key(&mut self, key: KeyEvent) -> Vec<AppCommand> {
        if let Some(dialog) = self.dialog.take() {
            self.handle_dialog_key(dialog, key);
            return self.drain();
        }
        if self.overlay.is_some() {
            self.handle_overlay_key(key);
            return self.drain();
        }
        if self.show_help {
            if matches!(
                key.code,
                KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')
            ) {
                self.show_help = false;
            }
            return self.drain();
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.running = false;
            return self.drain();
        }

        let action = self
            .active_view()
            .and_then(|view| view.actions().dispatch(key));
        let unhandled = match action {
            Some(action) => action.invoke(self, key),
            None => Some(key),
        };
        if let Some(key) = unhandled {
            self.handle_global_key(key);
        }
        self.drain()
    }

    fn drain(&mut self) -> Vec<AppCommand> {
        mem::take(&mut self.pending)
    }

    fn handle_dialog_key(&mut self, dialog: Dialog, key: KeyEvent) {
        match dialog {
            Dialog::Confirm(confirmation) => match confirmation.handle_key(key) {
                Step::Pending(confirmation) => self.dialog = Some(Dialog::Confirm(confirmation)),
                Step::Done(Some(command)) => self.queue(command),
                Step::Done(None) => {}
            },
            Dialog::Pick(picker) => match picker.handle_key(key) {
                Step::Pending(picker) => self.dialog = Some(Dialog::Pick(picker)),
                Step::Done(Some(command)) => self.queue(command),
                Step::Done(None) => {}
            },
            Dialog::Prompt(prompt) => match prompt.handle_key(key) {
                Step::Pending(prompt) => self.dialog = Some(Dialog::Prompt(prompt)),
                Step::Done(Some(Ok(command))) => self.queue(command),
                Step::Done(Some(Err(error))) => self.flash.error(error),
                Step::Done(None) => {}
            },
            Dialog::Transfer(form) => {
                let path = form.path.clone();
                match form.handle_key(key) {
                    Step::Pending(form) => self.dialog = Some(Dialog::Transfer(form)),
                    Step::Done(Some(request)) => self.queue(AppCommand::Transfer { path, request }),
                    Step::Done(None) => {}
                }
            }
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) {
        let page = self.table_page_size as u16;
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.overlay = None,
            KeyCode::Down | KeyCode::Char('j') => overlay.scroll = overlay.scroll.saturating_add(1),
            KeyCode::Up | KeyCode::Char('k') => overlay.scroll = overlay.scroll.saturating_sub(1),
            KeyCode::PageDown => overlay.scroll = overlay.scroll.saturating_add(page),
            KeyCode::PageUp => overlay.scroll = overlay.scroll.saturating_sub(page),
            KeyCode::Home | KeyCode::Char('g') => overlay.scroll = 0,
            KeyCode::End | KeyCode::Char('G') => {
                overlay.scroll = overlay.text.lines().count().saturating_sub(1) as u16;
            }
            _ => {}
        }
    }

    fn handle_global_key(&mut self, key: KeyEvent) {
        let page = self.table_page_size as isize;
        match key.code {
            KeyCode::Char('q') => self.running = false,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Esc => {
                if self.pop_view() {
                    self.queue(AppCommand::Reload);
                }
            }
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(page),
            KeyCode::PageUp => self.move_selection(-page),
            KeyCode::Home | KeyCode::Char('g') => {
                if let Some(view) = self.active_view_mut() {
                    view.select_first();
                }
            }
            KeyCode::End | KeyCode::Char('G') => {
                if let Some(view) = self.active_view_mut() {
                    view.select_last();
                }
            }
            _ => {}
        }
    }

    fn move_selection(&mut self, delta: isize) {
        if let Some(view) = self.active_view_mut() {
            view.move_selection(delta);
        }
    }
}

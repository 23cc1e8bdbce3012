//! Resource views assembled from a base browser and stacked extenders.
//!
//! Every extender contributes key bindings, row decoration and child
//! context. Layers are applied innermost first so an outer layer's binding
//! replaces an inner one for the same key, and its decoration runs last.

pub mod container;
pub mod extenders;
pub mod node;
pub mod pod;

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use crate::app::App;
use crate::forward::Forwarders;
use crate::keys::{KeyActions, KeyHint};
use crate::model::{ResourceKind, SortSpec, TableData, UsageSnapshot};

use extenders::Browser;

/// Values handed from a parent view to the views it opens.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ViewContext {
    pub namespace: Option<String>,
    pub pod_path: Option<String>,
    pub node: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BindEnv {
    pub read_only: bool,
}

pub struct DecorateEnv<'a> {
    pub forwarders: Option<&'a Forwarders>,
    pub usage: &'a UsageSnapshot,
}

pub trait Extender: Send + Sync {
    fn name(&self) -> &'static str;

    fn bind_keys(
        &self,
        _kind: ResourceKind,
        _actions: &mut KeyActions<App>,
        _env: &BindEnv,
    ) -> Result<()> {
        Ok(())
    }

    fn decorate(&self, _table: &mut TableData, _env: &DecorateEnv<'_>) {}

    fn inject(&self, _selection: Option<&str>, _context: &mut ViewContext) {}
}

pub struct ViewerBuilder {
    kind: ResourceKind,
    layers: Vec<Arc<dyn Extender>>,
    context: ViewContext,
}

impl ViewerBuilder {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            layers: vec![Arc::new(Browser)],
            context: ViewContext::default(),
        }
    }

    pub fn layer(mut self, extender: impl Extender + 'static) -> Self {
        self.layers.push(Arc::new(extender));
        self
    }

    pub fn context(mut self, context: ViewContext) -> Self {
        self.context = context;
        self
    }

    pub fn build(self, env: &BindEnv) -> ResourceViewer {
        let mut actions = KeyActions::new();
        for layer in &self.layers {
            let mut scratch = KeyActions::new();
            match layer.bind_keys(self.kind, &mut scratch, env) {
                Ok(()) => actions.merge(scratch),
                Err(error) => warn!(layer = layer.name(), "key binding failed: {error:#}"),
            }
        }
        if env.read_only {
            actions.retain_safe();
        }

        ResourceViewer {
            kind: self.kind,
            layers: self.layers,
            actions,
            context: self.context,
            data: TableData::default(),
            frame: TableData::default(),
            selected: 0,
            marks: BTreeSet::new(),
            sort: None,
            running: true,
        }
    }
}

pub struct ResourceViewer {
    kind: ResourceKind,
    layers: Vec<Arc<dyn Extender>>,
    actions: KeyActions<App>,
    context: ViewContext,
    data: TableData,
    frame: TableData,
    selected: usize,
    marks: BTreeSet<String>,
    sort: Option<SortSpec>,
    running: bool,
}

impl ResourceViewer {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn title(&self) -> String {
        match (&self.context.pod_path, &self.context.node) {
            (Some(path), _) if self.kind == ResourceKind::Containers => {
                format!("{}({path})", self.kind.title())
            }
            (_, Some(node)) if self.kind == ResourceKind::Nodes => {
                format!("{}({node})", self.kind.title())
            }
            _ => self.kind.title().to_string(),
        }
    }

    #[cfg(test)]
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn actions(&self) -> &KeyActions<App> {
        &self.actions
    }

    pub fn hints(&self) -> Vec<KeyHint> {
        self.actions.hints()
    }

    pub fn context(&self) -> &ViewContext {
        &self.context
    }

    /// The decorated and sorted rows the user sees.
    pub fn frame(&self) -> &TableData {
        &self.frame
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn set_data(&mut self, data: TableData, env: &DecorateEnv<'_>) {
        let keep = self.selected_path();
        self.data = data;
        if self.data.error.is_none() {
            let present = self
                .data
                .rows
                .iter()
                .map(|row| row.path())
                .collect::<BTreeSet<_>>();
            self.marks.retain(|path| present.contains(path));
        }
        self.redecorate(env);
        if let Some(index) = keep.and_then(|path| self.frame.index_of_path(&path)) {
            self.selected = index;
        }
    }

    pub fn set_error(&mut self, error: String, env: &DecorateEnv<'_>) {
        self.data.set_error(error, chrono::Local::now());
        self.redecorate(env);
    }

    pub fn redecorate(&mut self, env: &DecorateEnv<'_>) {
        let keep = self.selected_path();
        let mut frame = self.data.clone();
        for layer in &self.layers {
            layer.decorate(&mut frame, env);
        }
        if let Some(sort) = &self.sort {
            frame.sort_by_column(sort);
        }
        self.frame = frame;
        match keep.and_then(|path| self.frame.index_of_path(&path)) {
            Some(index) => self.selected = index,
            None => self.clamp_selection(),
        }
    }

    /// Sorting the same column again flips its direction.
    pub fn sort_by(&mut self, column: &str, ascending: bool, env: &DecorateEnv<'_>) {
        let ascending = match &self.sort {
            Some(current) if current.column.eq_ignore_ascii_case(column) => !current.ascending,
            _ => ascending,
        };
        self.sort = Some(SortSpec {
            column: column.to_string(),
            ascending,
        });
        self.redecorate(env);
    }

    pub fn selected_path(&self) -> Option<String> {
        self.frame.rows.get(self.selected).map(|row| row.path())
    }

    /// Marked rows in display order, or the selected row when nothing is marked.
    pub fn selected_paths(&self) -> Vec<String> {
        if self.marks.is_empty() {
            return self.selected_path().into_iter().collect();
        }
        let mut paths = self
            .frame
            .rows
            .iter()
            .map(|row| row.path())
            .filter(|path| self.marks.contains(path))
            .collect::<Vec<_>>();
        for mark in &self.marks {
            if !paths.contains(mark) {
                paths.push(mark.clone());
            }
        }
        paths
    }

    pub fn toggle_mark(&mut self) {
        let Some(path) = self.selected_path() else {
            return;
        };
        if !self.marks.remove(&path) {
            self.marks.insert(path);
        }
    }

    pub fn is_marked(&self, path: &str) -> bool {
        self.marks.contains(path)
    }

    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    pub fn delete_mark(&mut self, path: &str) {
        self.marks.remove(path);
    }

    pub fn clear_marks(&mut self) {
        self.marks.clear();
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.frame.rows.len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        self.selected = self.selected.saturating_add_signed(delta).min(len - 1);
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
    }

    pub fn select_last(&mut self) {
        self.selected = self.frame.rows.len().saturating_sub(1);
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.frame.rows.len().saturating_sub(1));
    }

    /// Context for a view opened from the current selection.
    pub fn child_context(&self) -> ViewContext {
        let mut context = self.context.clone();
        let selection = self.selected_path();
        for layer in &self.layers {
            layer.inject(selection.as_deref(), &mut context);
        }
        context
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn start(&mut self) {
        self.running = true;
    }
}

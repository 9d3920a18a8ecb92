//! In-memory canvas document for one project.
//!
//! All operations are synchronous and perform no I/O. Mutators report
//! whether they changed anything so callers only arm autosave on real edits.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::action::{Action, ActionType};
use crate::component::{merge_shallow, ComponentKind, PlacedComponent, Position, Properties};
use crate::ids::ProjectId;

/// The ordered list of placed components for a project.
///
/// Order is z-order: later components render on top.
#[derive(Debug, Clone)]
pub struct CanvasDocument {
    project_id: ProjectId,
    components: Vec<PlacedComponent>,
    /// Last millisecond stamp handed out; keeps generated ids monotonic.
    last_stamp: u64,
}

impl CanvasDocument {
    /// Empty document for `project_id`.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            components: Vec::new(),
            last_stamp: 0,
        }
    }

    /// Project this document belongs to.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Components in z-order.
    pub fn components(&self) -> &[PlacedComponent] {
        &self.components
    }

    /// Look up a component by its unique id.
    pub fn component(&self, id: &str) -> Option<&PlacedComponent> {
        self.components.iter().find(|c| c.unique_id == id)
    }

    /// Number of placed components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Owned copy of the components, for saving and broadcasting.
    pub fn snapshot(&self) -> Vec<PlacedComponent> {
        self.components.clone()
    }

    /// Place a new component on top of the canvas.
    ///
    /// Non-finite coordinates are stored as zero.
    pub fn add_component(&mut self, kind: ComponentKind, position: Position) -> PlacedComponent {
        let unique_id = self.fresh_id(kind.as_str(), |doc, id| doc.component(id).is_some());
        let component = PlacedComponent::new(unique_id, kind, position.sanitized());
        self.components.push(component.clone());
        component
    }

    /// Move a component. Non-finite positions and unknown ids are ignored.
    pub fn move_component(&mut self, id: &str, position: Position) -> bool {
        if !position.is_finite() {
            log::warn!("Ignoring non-finite position for {id}");
            return false;
        }
        match self.component_mut(id) {
            Some(c) if c.position != position => {
                c.position = position;
                true
            }
            _ => false,
        }
    }

    /// Shallow-merge `partial` into the component's properties.
    pub fn update_properties(&mut self, id: &str, partial: Properties) -> bool {
        match self.component_mut(id) {
            Some(c) => merge_shallow(&mut c.properties, partial),
            None => false,
        }
    }

    /// Attach a new action with empty config. `None` if the component is gone.
    pub fn add_action(&mut self, component_id: &str, action_type: ActionType) -> Option<Action> {
        self.component(component_id)?;
        let action_id = self.fresh_id("action", |doc, id| {
            doc.component(component_id)
                .is_some_and(|c| c.action(id).is_some())
        });
        let action = Action::new(action_id, action_type);
        self.component_mut(component_id)?.actions.push(action.clone());
        Some(action)
    }

    /// Shallow-merge `partial` into one action's config.
    pub fn update_action_config(&mut self, component_id: &str, action_id: &str, partial: Properties) -> bool {
        self.component_mut(component_id)
            .and_then(|c| c.action_mut(action_id))
            .map_or(false, |a| merge_shallow(&mut a.config, partial))
    }

    /// Remove a component and its actions. `None` if it was not there.
    pub fn remove_component(&mut self, id: &str) -> Option<PlacedComponent> {
        let index = self.components.iter().position(|c| c.unique_id == id)?;
        Some(self.components.remove(index))
    }

    /// Detach one action from a component.
    pub fn remove_action(&mut self, component_id: &str, action_id: &str) -> Option<Action> {
        let component = self.component_mut(component_id)?;
        let index = component.actions.iter().position(|a| a.id == action_id)?;
        Some(component.actions.remove(index))
    }

    /// Replace every component wholesale. No merge.
    pub fn replace_components(&mut self, components: Vec<PlacedComponent>) -> bool {
        if self.components == components {
            return false;
        }
        log::debug!(
            "Replacing {} components with {} for project {}",
            self.components.len(),
            components.len(),
            self.project_id
        );
        self.components = components;
        true
    }

    fn component_mut(&mut self, id: &str) -> Option<&mut PlacedComponent> {
        self.components.iter_mut().find(|c| c.unique_id == id)
    }

    /// `<prefix>-<millis>`, bumped past any stamp already issued or taken.
    fn fresh_id(&mut self, prefix: &str, taken: impl Fn(&Self, &str) -> bool) -> String {
        let mut stamp = now_millis().max(self.last_stamp + 1);
        loop {
            let candidate = format!("{prefix}-{stamp}");
            if !taken(self, &candidate) {
                self.last_stamp = stamp;
                return candidate;
            }
            stamp += 1;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

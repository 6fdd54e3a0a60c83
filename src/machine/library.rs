//! Library states: named pointers to externally defined subtrees.
//!
//! Resolution is delegated to a [`LibraryResolver`]. Expansion stores a private
//! copy of the resolved subtree under each library node and mirrors the
//! content root's ports and outcomes on the node, so a parent wires a library
//! exactly like any other state.

use crate::core::{LibraryRef, ModelError, State, StateKind};
use std::collections::BTreeMap;
use tracing::debug;

/// Library nesting deeper than this is treated as a reference cycle.
pub const MAX_LIBRARY_DEPTH: usize = 32;

/// Maps a library reference to the subtree it names.
pub trait LibraryResolver {
    fn resolve(&self, reference: &LibraryRef) -> Option<State>;
}

impl<F> LibraryResolver for F
where
    F: Fn(&LibraryRef) -> Option<State>,
{
    fn resolve(&self, reference: &LibraryRef) -> Option<State> {
        self(reference)
    }
}

/// In-memory set of library subtrees keyed by reference.
#[derive(Clone, Debug, Default)]
pub struct LibraryCatalog {
    entries: BTreeMap<(String, String), State>,
}

impl LibraryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: LibraryRef, state: State) -> &mut Self {
        self.entries.insert((reference.path, reference.name), state);
        self
    }

    pub fn with(mut self, reference: LibraryRef, state: State) -> Self {
        self.insert(reference, state);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LibraryResolver for LibraryCatalog {
    fn resolve(&self, reference: &LibraryRef) -> Option<State> {
        self.entries
            .get(&(reference.path.clone(), reference.name.clone()))
            .cloned()
    }
}

/// Expand every unexpanded library below and including `root`.
///
/// Returns how many library nodes were expanded. Fails with
/// [`ModelError::NotFound`] for an unresolvable reference and with
/// [`ModelError::Validation`] when nesting exceeds [`MAX_LIBRARY_DEPTH`].
pub fn expand_libraries(
    root: &mut State,
    resolver: &dyn LibraryResolver,
) -> Result<usize, ModelError> {
    expand(root, resolver, 0)
}

fn expand(state: &mut State, resolver: &dyn LibraryResolver, depth: usize) -> Result<usize, ModelError> {
    if depth > MAX_LIBRARY_DEPTH {
        return Err(ModelError::Validation(format!(
            "library nesting at '{}' exceeds {MAX_LIBRARY_DEPTH} levels, the references form a cycle",
            state.id
        )));
    }

    let owner_id = state.id.clone();
    let mut expanded = 0;
    if let StateKind::Library { reference, content } = &mut state.kind {
        if content.is_none() {
            let mut resolved = resolver
                .resolve(reference)
                .ok_or_else(|| ModelError::NotFound(format!("library '{reference}'")))?;
            resolved.parent = Some(owner_id.clone());
            debug!(state = %owner_id, library = %reference, "expanded library");
            *content = Some(Box::new(resolved));
            expanded += 1;
        }
        if let Some(content) = content {
            expanded += expand(content, resolver, depth + 1)?;
        }
    }
    if let Some(container) = state.container_mut() {
        for child in container.children.values_mut() {
            expanded += expand(child, resolver, depth)?;
        }
    }

    let mirrored = state
        .library_content()
        .map(|c| (c.input_ports.clone(), c.output_ports.clone(), c.outcomes.clone()));
    if let Some((inputs, outputs, outcomes)) = mirrored {
        state.input_ports = inputs;
        state.output_ports = outputs;
        state.outcomes = outcomes;
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataPort, DataType, Outcome, PortKind};

    fn greeter() -> State {
        let mut content = State::execution("GREET", "greet", "greet");
        content
            .add_port(
                PortKind::Output,
                DataPort::new(0, "greeting", DataType::Str, "hi").unwrap(),
            )
            .unwrap();
        content.add_outcome(Outcome::new(1, "loud")).unwrap();
        content
    }

    #[test]
    fn expansion_mirrors_content_interface() {
        let reference = LibraryRef::new("common", "greeter");
        let catalog = LibraryCatalog::new().with(reference.clone(), greeter());
        let mut root = State::hierarchy("ROOT", "root");
        root.add_child(State::library("LIB", "lib", reference)).unwrap();

        assert_eq!(expand_libraries(&mut root, &catalog).unwrap(), 1);
        let library = root.child("LIB").unwrap();
        assert_eq!(library.library_content().unwrap().parent(), Some("LIB"));
        assert!(library.port_by_name(PortKind::Output, "greeting").is_some());
        assert!(library.outcome(1).is_some());

        // already expanded libraries are left alone
        assert_eq!(expand_libraries(&mut root, &catalog).unwrap(), 0);
    }

    #[test]
    fn unresolvable_reference_is_not_found() {
        let mut root = State::library("LIB", "lib", LibraryRef::new("x", "missing"));
        let resolver = |_: &LibraryRef| -> Option<State> { None };
        assert!(matches!(
            expand_libraries(&mut root, &resolver),
            Err(ModelError::NotFound(_))
        ));
    }

    #[test]
    fn self_referencing_library_is_rejected() {
        let reference = LibraryRef::new("loops", "ouroboros");
        let inner = reference.clone();
        let resolver = move |_: &LibraryRef| Some(State::library("INNER", "inner", inner.clone()));
        let mut root = State::library("LIB", "lib", reference);
        assert!(matches!(
            expand_libraries(&mut root, &resolver),
            Err(ModelError::Validation(_))
        ));
    }
}

//! Editing named sub-resource collections of a parent resource
//!
//! ARM has no partial-update verb for load balancer children, so every change
//! is a splice into one of the parent's collections followed by a full PUT.

use crate::models::{FrontendIpConfiguration, InboundNatPool};

/// A sub-resource addressed by name within its parent
pub trait Named {
    fn name(&self) -> Option<&str>;
}

impl Named for InboundNatPool {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Named for FrontendIpConfiguration {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Position and element named `name`, if present
pub fn find_by_name<'a, T: Named>(collection: &'a [T], name: &str) -> Option<(usize, &'a T)> {
    collection
        .iter()
        .enumerate()
        .find(|(_, element)| element.name() == Some(name))
}

/// Replace the element sharing `element`'s name, or add it if there is none.
///
/// The previous element is dropped from its position and the new one is
/// appended; nothing is merged. Returns the element that was replaced.
pub fn replace_element<T: Named>(collection: &mut Vec<T>, element: T) -> Option<T> {
    let previous = match element.name() {
        Some(name) => find_by_name(collection, name).map(|(index, _)| index),
        None => None,
    }
    .map(|index| collection.remove(index));

    collection.push(element);
    previous
}

/// Remove and return the element named `name`
pub fn remove_element<T: Named>(collection: &mut Vec<T>, name: &str) -> Option<T> {
    find_by_name(collection, name).map(|(index, _)| index).map(|index| collection.remove(index))
}

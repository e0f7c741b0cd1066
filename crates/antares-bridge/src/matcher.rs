// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic matching.
//!
//! Matching is exact: a registered topic is a literal bus topic, never a
//! filter. Wildcard characters are therefore rejected when the registry is
//! built, and the subscription list is the registry's key set as-is.

use crate::schema::{Registry, SchemaNode};

/// Resolve an inbound topic to its registered node.
///
/// `None` means the topic is not (yet) described by the registry; callers
/// drop the message.
pub fn resolve<'a>(topic: &str, registry: &'a Registry) -> Option<&'a SchemaNode> {
    registry.get(topic)
}

/// Exact topics to subscribe to on the bus.
pub fn subscriptions(registry: &Registry) -> Vec<String> {
    registry.topics().map(str::to_string).collect()
}

/// Check that a topic can be matched literally.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic is empty");
    }
    if topic.contains(['+', '#']) {
        return Err("wildcards are not supported, topics are matched exactly");
    }
    if topic.contains('\0') {
        return Err("topic contains a NUL character");
    }
    Ok(())
}

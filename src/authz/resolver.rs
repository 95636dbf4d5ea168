//! Effective-project resolution.
//!
//! Some collections (profiles, images, networks, ...) can be shared with the
//! default project instead of being private to each project. When a request
//! targets a project that shares a collection, policy on those entities is
//! governed by the project that actually owns them.

use std::borrow::Cow;

use crate::{entity::EntityUrl, request::RequestContext};

/// Return the URL whose project governs policy for `entity`.
///
/// Borrows `entity` unchanged unless the request carries an override for its
/// type. The input is never modified.
pub fn effective_entity_url<'a>(ctx: &RequestContext, entity: &'a EntityUrl) -> Cow<'a, EntityUrl> {
    let entity_type = entity.entity_type();
    if !entity_type.supports_project_delegation() {
        return Cow::Borrowed(entity);
    }

    match ctx.effective_projects().get(entity_type) {
        Some(project) if project != entity.project() => {
            Cow::Owned(entity.with_project(project))
        }
        _ => Cow::Borrowed(entity),
    }
}

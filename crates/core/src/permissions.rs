use std::fmt;

use tracing::info;
use uuid::Uuid;

use crate::catalog::{self, grants, images, labels, principals};
use crate::error::{Error, Result};
use crate::ImageBank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Add,
    Change,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::View, Action::Add, Action::Change, Action::Delete];

    fn index(self) -> usize {
        match self {
            Action::View => 0,
            Action::Add => 1,
            Action::Change => 2,
            Action::Delete => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Collection,
    Image,
    Label,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Collection => "collection",
            ResourceType::Image => "image",
            ResourceType::Label => "label",
        }
    }

    fn index(self) -> usize {
        match self {
            ResourceType::Collection => 0,
            ResourceType::Image => 1,
            ResourceType::Label => 2,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete object an action is performed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Collection(Uuid),
    Image(Uuid),
    Label(Uuid),
}

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Collection(_) => ResourceType::Collection,
            Resource::Image(_) => ResourceType::Image,
            Resource::Label(_) => ResourceType::Label,
        }
    }

    pub fn id(&self) -> Uuid {
        match *self {
            Resource::Collection(id) | Resource::Image(id) | Resource::Label(id) => id,
        }
    }
}

const PERMISSIONS: [[&str; 4]; 3] = [
    ["view_collection", "add_collection", "change_collection", "delete_collection"],
    ["view_image", "add_image", "change_image", "delete_image"],
    ["view_label", "add_label", "change_label", "delete_label"],
];

/// Permission key stored in grants for an action on a resource type.
pub fn permission_key(resource_type: ResourceType, action: Action) -> &'static str {
    PERMISSIONS[resource_type.index()][action.index()]
}

/// Capability check consulted by callers before mutating operations.
pub trait Authorizer {
    fn check(&self, principal_id: Uuid, resource: Resource, action: Action) -> Result<bool>;
}

/// Owners may do anything with what they own. Anyone else needs a grant on
/// the object; for images a grant on the containing collection also counts.
impl Authorizer for ImageBank {
    fn check(&self, principal_id: Uuid, resource: Resource, action: Action) -> Result<bool> {
        let conn = self.catalog.conn();
        let id = resource.id();
        let owner = match resource {
            Resource::Collection(_) => catalog::collections::get(conn, id)?
                .ok_or(Error::CollectionNotFound(id))?
                .owner_id,
            Resource::Label(_) => labels::get(conn, id)?.ok_or(Error::LabelNotFound(id))?.owner_id,
            Resource::Image(_) => {
                let image = images::get(conn, id)?.ok_or(Error::ImageNotFound(id))?;
                if image.owner_id != principal_id
                    && grants::has(
                        conn,
                        principal_id,
                        ResourceType::Collection.as_str(),
                        image.collection_id,
                        permission_key(ResourceType::Collection, action),
                    )?
                {
                    return Ok(true);
                }
                image.owner_id
            }
        };
        if owner == principal_id {
            return Ok(true);
        }
        let resource_type = resource.resource_type();
        grants::has(
            conn,
            principal_id,
            resource_type.as_str(),
            id,
            permission_key(resource_type, action),
        )
    }
}

impl ImageBank {
    /// Grant `actions` on a collection and on every image currently in it.
    pub fn share_collection(
        &mut self,
        collection_id: Uuid,
        grantee: Uuid,
        actions: &[Action],
    ) -> Result<()> {
        let tx = self.catalog.write()?;
        if catalog::collections::get(&tx, collection_id)?.is_none() {
            return Err(Error::CollectionNotFound(collection_id));
        }
        if principals::get(&tx, grantee)?.is_none() {
            return Err(Error::PrincipalNotFound(grantee.to_string()));
        }
        let image_ids = catalog::collections::image_ids(&tx, collection_id)?;
        for &action in actions {
            grants::insert(
                &tx,
                grantee,
                ResourceType::Collection.as_str(),
                collection_id,
                permission_key(ResourceType::Collection, action),
            )?;
            for &image_id in &image_ids {
                grants::insert(
                    &tx,
                    grantee,
                    ResourceType::Image.as_str(),
                    image_id,
                    permission_key(ResourceType::Image, action),
                )?;
            }
        }
        tx.commit()?;
        info!(%collection_id, %grantee, ?actions, "collection shared");
        Ok(())
    }

    /// Remove every grant `grantee` holds on the collection and its images.
    pub fn revoke_collection_share(&mut self, collection_id: Uuid, grantee: Uuid) -> Result<()> {
        let tx = self.catalog.write()?;
        let image_ids = catalog::collections::image_ids(&tx, collection_id)?;
        for action in Action::ALL {
            grants::delete(
                &tx,
                grantee,
                ResourceType::Collection.as_str(),
                collection_id,
                permission_key(ResourceType::Collection, action),
            )?;
            for &image_id in &image_ids {
                grants::delete(
                    &tx,
                    grantee,
                    ResourceType::Image.as_str(),
                    image_id,
                    permission_key(ResourceType::Image, action),
                )?;
            }
        }
        tx.commit()?;
        info!(%collection_id, %grantee, "collection share revoked");
        Ok(())
    }
}

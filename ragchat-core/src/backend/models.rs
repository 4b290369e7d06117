//! Parsing of the backend's `/models` response.

use crate::error::BackendError;
use crate::types::{ModelCatalog, ModelDescriptor, ModelOption};
use serde::{Deserialize, Serialize};

/// Outcome of a model listing as presented to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelListing {
    Available(ModelCatalog),
    Unavailable { reason: String },
}

impl ModelListing {
    /// Selector options; empty when unavailable.
    pub fn options(&self) -> Vec<ModelOption> {
        match self {
            ModelListing::Available(catalog) => catalog.options(),
            ModelListing::Unavailable { .. } => Vec::new(),
        }
    }

    pub fn default_model(&self) -> Option<&str> {
        match self {
            ModelListing::Available(catalog) => catalog.default_model.as_deref(),
            ModelListing::Unavailable { .. } => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawModelList {
    Names(Vec<String>),
    Catalog {
        models: Vec<RawModel>,
        #[serde(default)]
        default_model: Option<String>,
    },
}

#[derive(Deserialize)]
struct RawModel {
    name: String,
    #[serde(default)]
    model_type: Option<String>,
}

/// Parse a `/models` body.
///
/// Accepts either a JSON array of names (order kept, first is default) or a
/// `{"models": [{"name", "model_type"}], "default_model"}` catalog, whose
/// entries are grouped by `model_type` in order of first appearance.
pub fn parse_model_list(body: &str) -> Result<ModelCatalog, BackendError> {
    let raw: RawModelList =
        serde_json::from_str(body).map_err(|e| BackendError::MalformedResponse {
            message: format!("expected a JSON list of models: {e}"),
        })?;

    match raw {
        RawModelList::Names(names) => Ok(ModelCatalog::from_names(names)),
        RawModelList::Catalog {
            models,
            default_model,
        } => {
            let mut groups: Vec<(Option<String>, Vec<ModelDescriptor>)> = Vec::new();
            for RawModel { name, model_type } in models {
                let descriptor = ModelDescriptor {
                    name,
                    model_type: model_type.clone(),
                };
                match groups.iter_mut().find(|(kind, _)| *kind == model_type) {
                    Some((_, members)) => members.push(descriptor),
                    None => groups.push((model_type, vec![descriptor])),
                }
            }
            let models: Vec<ModelDescriptor> =
                groups.into_iter().flat_map(|(_, members)| members).collect();

            let default_model = default_model
                .filter(|name| models.iter().any(|m| &m.name == name))
                .or_else(|| models.first().map(|m| m.name.clone()));

            Ok(ModelCatalog {
                models,
                default_model,
            })
        }
    }
}

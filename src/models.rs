use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::schema::{ingrediente, maki, maki_ingrediente};

// Records hold scalar columns only. Peers are reached through the query
// accessors, so equality, Debug and serde never walk the association.

#[derive(Debug, Clone, PartialEq, Queryable, Serialize, Deserialize)]
pub(crate) struct Ingrediente {
    pub id: i64,
    pub nombre: String,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Queryable, Serialize, Deserialize)]
pub(crate) struct Maki {
    pub id: i64,
    pub nombre: String,
    pub descripcion: String,
    pub precio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[table_name = "maki_ingrediente"]
pub(crate) struct MakiIngrediente {
    pub maki_id: i64,
    pub ingrediente_id: i64,
}

/// Decodes a cached listing written by the cache layer.
pub(crate) fn from_u8<T>(bytes: &[u8]) -> Result<Vec<T>, bincode::Error>
where
    T: serde::de::DeserializeOwned,
{
    bincode::deserialize(bytes)
}

#[derive(Debug, Clone, Deserialize, Insertable)]
#[table_name = "ingrediente"]
pub(crate) struct NewIngrediente {
    pub nombre: String,
    pub stock: i32,
}

#[derive(Debug, Clone, Deserialize, Insertable)]
#[table_name = "maki"]
pub(crate) struct NewMaki {
    pub nombre: String,
    pub descripcion: String,
    pub precio: f64,
}

/// Body of a maki creation request: the scalar fields plus the ingredient ids to link.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreateMaki {
    #[serde(flatten)]
    pub maki: NewMaki,
    #[serde(default)]
    pub ingredientes: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[table_name = "ingrediente"]
pub(crate) struct IngredienteChanges {
    pub nombre: Option<String>,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[table_name = "maki"]
pub(crate) struct MakiChanges {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub precio: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct StockAdjustment {
    pub delta: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Disponibilidad {
    pub maki_id: i64,
    pub disponible: bool,
    /// Linked ingredient ids with no stock left.
    pub faltantes: Vec<i64>,
}

pub(crate) fn validate_stock(stock: i32) -> Result<(), CatalogError> {
    if stock < 0 {
        return Err(CatalogError::validation(
            "stock",
            format!("must not be negative, got {}", stock),
        ));
    }
    Ok(())
}

pub(crate) fn validate_precio(precio: f64) -> Result<(), CatalogError> {
    if !precio.is_finite() || precio < 0.0 {
        return Err(CatalogError::validation(
            "precio",
            format!("must be a non-negative number, got {}", precio),
        ));
    }
    Ok(())
}

impl NewIngrediente {
    pub(crate) fn validate(&self) -> Result<(), CatalogError> {
        validate_stock(self.stock)
    }
}

impl NewMaki {
    pub(crate) fn validate(&self) -> Result<(), CatalogError> {
        validate_precio(self.precio)
    }
}

impl IngredienteChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.nombre.is_none() && self.stock.is_none()
    }

    pub(crate) fn validate(&self) -> Result<(), CatalogError> {
        match self.stock {
            Some(stock) => validate_stock(stock),
            None => Ok(()),
        }
    }
}

impl MakiChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.nombre.is_none() && self.descripcion.is_none() && self.precio.is_none()
    }

    pub(crate) fn validate(&self) -> Result<(), CatalogError> {
        match self.precio {
            Some(precio) => validate_precio(precio),
            None => Ok(()),
        }
    }
}

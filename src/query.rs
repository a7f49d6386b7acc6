use std::collections::BTreeSet;
use std::str::FromStr;

use diesel::prelude::*;
use diesel::result::OptionalExtension;

use crate::db::{self, DbConnection};
use crate::error::CatalogError;
use crate::models::{
    CreateMaki, Disponibilidad, Ingrediente, IngredienteChanges, Maki, MakiChanges,
    MakiIngrediente, NewIngrediente,
};
use crate::schema::{ingrediente, maki, maki_ingrediente};

/// What to do with join rows when deleting a maki or ingrediente they reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum DeletePolicy {
    #[default]
    Reject,
    Cascade,
}

impl FromStr for DeletePolicy {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(DeletePolicy::Reject),
            "cascade" => Ok(DeletePolicy::Cascade),
            other => Err(CatalogError::Config(format!(
                "unknown delete policy '{}', expected 'reject' or 'cascade'",
                other
            ))),
        }
    }
}

const INGREDIENTE: &str = "ingrediente";
const MAKI: &str = "maki";

fn ingrediente_exists(ingrediente_id: i64, conn: &DbConnection) -> Result<bool, CatalogError> {
    let found = ingrediente::table
        .find(ingrediente_id)
        .select(ingrediente::id)
        .first::<i64>(conn)
        .optional()?;
    Ok(found.is_some())
}

fn maki_exists(maki_id: i64, conn: &DbConnection) -> Result<bool, CatalogError> {
    let found = maki::table
        .find(maki_id)
        .select(maki::id)
        .first::<i64>(conn)
        .optional()?;
    Ok(found.is_some())
}

fn require_ingrediente(ingrediente_id: i64, conn: &DbConnection) -> Result<(), CatalogError> {
    if ingrediente_exists(ingrediente_id, conn)? {
        Ok(())
    } else {
        Err(CatalogError::not_found(INGREDIENTE, ingrediente_id))
    }
}

fn require_maki(maki_id: i64, conn: &DbConnection) -> Result<(), CatalogError> {
    if maki_exists(maki_id, conn)? {
        Ok(())
    } else {
        Err(CatalogError::not_found(MAKI, maki_id))
    }
}

pub(crate) fn create_ingrediente(
    new: &NewIngrediente,
    conn: &DbConnection,
) -> Result<Ingrediente, CatalogError> {
    new.validate()?;
    let created = db::write_transaction(conn, || {
        diesel::insert_into(ingrediente::table)
            .values(new)
            .execute(conn)?;
        let id = db::last_insert_id(conn)?;
        Ok(ingrediente::table.find(id).first::<Ingrediente>(conn)?)
    })?;
    log::info!("created ingrediente {} ({})", created.id, created.nombre);
    Ok(created)
}

pub(crate) fn create_maki(request: &CreateMaki, conn: &DbConnection) -> Result<Maki, CatalogError> {
    request.maki.validate()?;
    let wanted: BTreeSet<i64> = request.ingredientes.iter().copied().collect();

    let created = db::write_transaction(conn, || {
        if !wanted.is_empty() {
            let found: BTreeSet<i64> = ingrediente::table
                .filter(ingrediente::id.eq_any(wanted.iter().copied().collect::<Vec<_>>()))
                .select(ingrediente::id)
                .load::<i64>(conn)?
                .into_iter()
                .collect();
            let missing: Vec<i64> = wanted.difference(&found).copied().collect();
            if !missing.is_empty() {
                return Err(CatalogError::Referential(missing));
            }
        }

        diesel::insert_into(maki::table)
            .values(&request.maki)
            .execute(conn)?;
        let id = db::last_insert_id(conn)?;
        for ingrediente_id in &wanted {
            diesel::insert_into(maki_ingrediente::table)
                .values(&MakiIngrediente {
                    maki_id: id,
                    ingrediente_id: *ingrediente_id,
                })
                .execute(conn)?;
        }
        Ok(maki::table.find(id).first::<Maki>(conn)?)
    })?;
    log::info!(
        "created maki {} ({}) with {} ingredientes",
        created.id,
        created.nombre,
        wanted.len()
    );
    Ok(created)
}

pub(crate) fn find_ingrediente(
    ingrediente_id: i64,
    conn: &DbConnection,
) -> Result<Ingrediente, CatalogError> {
    ingrediente::table
        .find(ingrediente_id)
        .first::<Ingrediente>(conn)
        .optional()?
        .ok_or_else(|| CatalogError::not_found(INGREDIENTE, ingrediente_id))
}

pub(crate) fn find_maki(maki_id: i64, conn: &DbConnection) -> Result<Maki, CatalogError> {
    maki::table
        .find(maki_id)
        .first::<Maki>(conn)
        .optional()?
        .ok_or_else(|| CatalogError::not_found(MAKI, maki_id))
}

pub(crate) fn find_all_ingredientes(conn: &DbConnection) -> Result<Vec<Ingrediente>, CatalogError> {
    Ok(ingrediente::table
        .order(ingrediente::id)
        .load::<Ingrediente>(conn)?)
}

pub(crate) fn find_all_makis(conn: &DbConnection) -> Result<Vec<Maki>, CatalogError> {
    Ok(maki::table.order(maki::id).load::<Maki>(conn)?)
}

pub(crate) fn find_all_links(conn: &DbConnection) -> Result<Vec<MakiIngrediente>, CatalogError> {
    Ok(maki_ingrediente::table
        .order((maki_ingrediente::maki_id, maki_ingrediente::ingrediente_id))
        .load::<MakiIngrediente>(conn)?)
}

pub(crate) fn update_ingrediente(
    ingrediente_id: i64,
    changes: &IngredienteChanges,
    conn: &DbConnection,
) -> Result<Ingrediente, CatalogError> {
    changes.validate()?;
    if changes.is_empty() {
        return find_ingrediente(ingrediente_id, conn);
    }
    db::write_transaction(conn, || {
        let updated = diesel::update(ingrediente::table.find(ingrediente_id))
            .set(changes)
            .execute(conn)?;
        if updated == 0 {
            return Err(CatalogError::not_found(INGREDIENTE, ingrediente_id));
        }
        find_ingrediente(ingrediente_id, conn)
    })
}

pub(crate) fn update_maki(
    maki_id: i64,
    changes: &MakiChanges,
    conn: &DbConnection,
) -> Result<Maki, CatalogError> {
    changes.validate()?;
    if changes.is_empty() {
        return find_maki(maki_id, conn);
    }
    db::write_transaction(conn, || {
        let updated = diesel::update(maki::table.find(maki_id))
            .set(changes)
            .execute(conn)?;
        if updated == 0 {
            return Err(CatalogError::not_found(MAKI, maki_id));
        }
        find_maki(maki_id, conn)
    })
}

/// Adds `delta` to the stock of an ingrediente. The result must stay non-negative.
///
/// The guard lives in the UPDATE itself, so concurrent adjustments never act on
/// a stock value another writer already changed.
pub(crate) fn adjust_stock(
    ingrediente_id: i64,
    delta: i32,
    conn: &DbConnection,
) -> Result<Ingrediente, CatalogError> {
    db::write_transaction(conn, || {
        let target = ingrediente::table.find(ingrediente_id);
        let updated = if delta >= 0 {
            diesel::update(target.filter(ingrediente::stock.le(i32::MAX - delta)))
                .set(ingrediente::stock.eq(ingrediente::stock + delta))
                .execute(conn)?
        } else if delta > i32::MIN {
            diesel::update(target.filter(ingrediente::stock.ge(-delta)))
                .set(ingrediente::stock.eq(ingrediente::stock + delta))
                .execute(conn)?
        } else {
            0
        };
        if updated == 0 {
            let current = find_ingrediente(ingrediente_id, conn)?;
            let reason = if delta >= 0 {
                format!("adding {} to {} overflows", delta, current.stock)
            } else {
                format!(
                    "only {} left, cannot take {}",
                    current.stock,
                    delta.unsigned_abs()
                )
            };
            return Err(CatalogError::validation("stock", reason));
        }
        find_ingrediente(ingrediente_id, conn)
    })
}

/// Links a maki to an ingrediente. Linking an existing pair is a no-op.
pub(crate) fn link_ingrediente(
    maki_id: i64,
    ingrediente_id: i64,
    conn: &DbConnection,
) -> Result<(), CatalogError> {
    db::write_transaction(conn, || {
        require_maki(maki_id, conn)?;
        require_ingrediente(ingrediente_id, conn)?;
        let existing = maki_ingrediente::table
            .find((maki_id, ingrediente_id))
            .first::<MakiIngrediente>(conn)
            .optional()?;
        if existing.is_none() {
            diesel::insert_into(maki_ingrediente::table)
                .values(&MakiIngrediente {
                    maki_id,
                    ingrediente_id,
                })
                .execute(conn)?;
        }
        Ok(())
    })
}

/// Removes the link between a maki and an ingrediente, if any.
pub(crate) fn unlink_ingrediente(
    maki_id: i64,
    ingrediente_id: i64,
    conn: &DbConnection,
) -> Result<(), CatalogError> {
    db::write_transaction(conn, || {
        require_maki(maki_id, conn)?;
        require_ingrediente(ingrediente_id, conn)?;
        diesel::delete(maki_ingrediente::table.find((maki_id, ingrediente_id))).execute(conn)?;
        Ok(())
    })
}

pub(crate) fn delete_ingrediente(
    ingrediente_id: i64,
    policy: DeletePolicy,
    conn: &DbConnection,
) -> Result<(), CatalogError> {
    db::write_transaction(conn, || {
        require_ingrediente(ingrediente_id, conn)?;
        let referencing =
            maki_ingrediente::table.filter(maki_ingrediente::ingrediente_id.eq(ingrediente_id));
        let links: i64 = referencing.clone().count().get_result(conn)?;
        if links > 0 {
            match policy {
                DeletePolicy::Reject => {
                    return Err(CatalogError::Conflict {
                        entity: INGREDIENTE,
                        id: ingrediente_id,
                        links,
                    })
                }
                DeletePolicy::Cascade => {
                    diesel::delete(referencing).execute(conn)?;
                }
            }
        }
        diesel::delete(ingrediente::table.find(ingrediente_id)).execute(conn)?;
        Ok(())
    })?;
    log::info!("deleted ingrediente {}", ingrediente_id);
    Ok(())
}

pub(crate) fn delete_maki(
    maki_id: i64,
    policy: DeletePolicy,
    conn: &DbConnection,
) -> Result<(), CatalogError> {
    db::write_transaction(conn, || {
        require_maki(maki_id, conn)?;
        let referencing = maki_ingrediente::table.filter(maki_ingrediente::maki_id.eq(maki_id));
        let links: i64 = referencing.clone().count().get_result(conn)?;
        if links > 0 {
            match policy {
                DeletePolicy::Reject => {
                    return Err(CatalogError::Conflict {
                        entity: MAKI,
                        id: maki_id,
                        links,
                    })
                }
                DeletePolicy::Cascade => {
                    diesel::delete(referencing).execute(conn)?;
                }
            }
        }
        diesel::delete(maki::table.find(maki_id)).execute(conn)?;
        Ok(())
    })?;
    log::info!("deleted maki {}", maki_id);
    Ok(())
}

pub(crate) fn find_ingredientes_for_maki(
    maki_id: i64,
    conn: &DbConnection,
) -> Result<Vec<Ingrediente>, CatalogError> {
    require_maki(maki_id, conn)?;
    Ok(maki_ingrediente::table
        .inner_join(ingrediente::table)
        .filter(maki_ingrediente::maki_id.eq(maki_id))
        .select(ingrediente::all_columns)
        .order(ingrediente::id)
        .load::<Ingrediente>(conn)?)
}

pub(crate) fn find_makis_for_ingrediente(
    ingrediente_id: i64,
    conn: &DbConnection,
) -> Result<Vec<Maki>, CatalogError> {
    require_ingrediente(ingrediente_id, conn)?;
    Ok(maki_ingrediente::table
        .inner_join(maki::table)
        .filter(maki_ingrediente::ingrediente_id.eq(ingrediente_id))
        .select(maki::all_columns)
        .order(maki::id)
        .load::<Maki>(conn)?)
}

/// A maki can be served when it has ingredientes and none of them ran out.
pub(crate) fn find_disponibilidad(
    maki_id: i64,
    conn: &DbConnection,
) -> Result<Disponibilidad, CatalogError> {
    let ingredientes = find_ingredientes_for_maki(maki_id, conn)?;
    let faltantes: Vec<i64> = ingredientes
        .iter()
        .filter(|i| i.stock <= 0)
        .map(|i| i.id)
        .collect();
    Ok(Disponibilidad {
        maki_id,
        disponible: !ingredientes.is_empty() && faltantes.is_empty(),
        faltantes,
    })
}

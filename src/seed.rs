use std::collections::BTreeSet;
use std::io::Write;

use diesel::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::{self, DbConnection};
use crate::error::CatalogError;
use crate::models::{MakiIngrediente, NewIngrediente, NewMaki};
use crate::query;
use crate::schema::{ingrediente, maki, maki_ingrediente};

const NOMBRES_INGREDIENTES: &[&str] = &[
    "Salmón", "Atún", "Pollo", "Carne", "Huevo", "Lechuga", "Tomate", "Cebolla", "Ajo",
    "Perejil", "Sal", "Pimienta", "Aceite", "Vinagre", "Salsa", "Queso", "Leche", "Yogurt",
    "Mantequilla", "Crema", "Arroz", "Trigo", "Avena", "Quinoa", "Cebada", "Palta", "Tampico",
    "Queso crema", "Cangrejo", "Pepino",
];

const NOMBRES_MAKIS: &[&str] = &[
    "California Roll",
    "Acevichado",
    "Philadelphia Roll",
    "Dragon Roll",
    "Spicy Tuna Roll",
    "Salmon Roll",
    "Eel Roll",
    "Crab Roll",
    "Tempura Roll",
    "Rainbow Roll",
];

const DESCRIPCIONES: &[&str] = &[
    "Maki clásico con palta, cangrejo y pepino",
    "Maki relleno de pescado y cubierto con salsa acevichada",
    "Maki con salmón y queso crema",
    "Maki especial con ingredientes premium",
    "Maki picante con atún fresco",
    "Maki tradicional con salmón",
    "Maki con anguila y salsa especial",
    "Maki de cangrejo con mayonesa",
    "Maki frito con tempura",
    "Maki colorido con múltiples ingredientes",
];

const MIN_LINKS_PER_MAKI: usize = 2;
const MAX_LINKS_PER_MAKI: usize = 5;

fn pick<'a, R: Rng>(rng: &mut R, choices: &[&'a str]) -> &'a str {
    choices.choose(rng).copied().unwrap_or_default()
}

pub(crate) fn generate_ingredientes<R: Rng>(rng: &mut R, count: usize) -> Vec<NewIngrediente> {
    (1..=count)
        .map(|i| NewIngrediente {
            nombre: format!("{} {}", pick(rng, NOMBRES_INGREDIENTES), i),
            stock: rng.gen_range(10..=200),
        })
        .collect()
}

pub(crate) fn generate_makis<R: Rng>(rng: &mut R, count: usize) -> Vec<NewMaki> {
    (1..=count)
        .map(|i| {
            let precio: f64 = rng.gen_range(15.50..=35.99);
            NewMaki {
                nombre: format!("{} {}", pick(rng, NOMBRES_MAKIS), i),
                descripcion: pick(rng, DESCRIPCIONES).to_string(),
                precio: (precio * 100.0).round() / 100.0,
            }
        })
        .collect()
}

/// Picks between two and five distinct ingredientes for every maki, capped by
/// how many ingredientes exist.
pub(crate) fn generate_links<R: Rng>(
    rng: &mut R,
    maki_ids: &[i64],
    ingrediente_ids: &[i64],
) -> Vec<MakiIngrediente> {
    let mut links = Vec::new();
    if ingrediente_ids.is_empty() {
        return links;
    }
    let max = MAX_LINKS_PER_MAKI.min(ingrediente_ids.len());
    let min = MIN_LINKS_PER_MAKI.min(max);
    for &maki_id in maki_ids {
        let wanted = rng.gen_range(min..=max);
        let chosen: BTreeSet<i64> = ingrediente_ids
            .choose_multiple(rng, wanted)
            .copied()
            .collect();
        links.extend(chosen.into_iter().map(|ingrediente_id| MakiIngrediente {
            maki_id,
            ingrediente_id,
        }));
    }
    links
}

/// Replaces the catalog with fake data. Returns the number of rows inserted.
pub(crate) fn seed<R: Rng>(
    rng: &mut R,
    ingredientes: usize,
    makis: usize,
    conn: &DbConnection,
) -> Result<usize, CatalogError> {
    db::write_transaction(conn, || {
        diesel::delete(maki_ingrediente::table).execute(conn)?;
        diesel::delete(maki::table).execute(conn)?;
        diesel::delete(ingrediente::table).execute(conn)?;

        let mut ingrediente_ids = Vec::with_capacity(ingredientes);
        for new in generate_ingredientes(rng, ingredientes) {
            diesel::insert_into(ingrediente::table)
                .values(&new)
                .execute(conn)?;
            ingrediente_ids.push(db::last_insert_id(conn)?);
        }

        let mut maki_ids = Vec::with_capacity(makis);
        for new in generate_makis(rng, makis) {
            diesel::insert_into(maki::table).values(&new).execute(conn)?;
            maki_ids.push(db::last_insert_id(conn)?);
        }

        let links = generate_links(rng, &maki_ids, &ingrediente_ids);
        for link in &links {
            diesel::insert_into(maki_ingrediente::table)
                .values(link)
                .execute(conn)?;
        }

        let inserted = ingrediente_ids.len() + maki_ids.len() + links.len();
        log::info!(
            "seeded {} ingredientes, {} makis, {} links",
            ingrediente_ids.len(),
            maki_ids.len(),
            links.len()
        );
        Ok(inserted)
    })
}

/// Dumps every row as one JSON object per line: ingredientes, makis, then links.
pub(crate) fn export<W: Write>(out: &mut W, conn: &DbConnection) -> Result<usize, CatalogError> {
    let mut lines = 0;
    for row in query::find_all_ingredientes(conn)? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
        lines += 1;
    }
    for row in query::find_all_makis(conn)? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
        lines += 1;
    }
    for row in query::find_all_links(conn)? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
        lines += 1;
    }
    out.flush()?;
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_generated_values_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for new in generate_ingredientes(&mut rng, 40) {
            assert!((10..=200).contains(&new.stock));
        }
        for new in generate_makis(&mut rng, 40) {
            assert!(new.precio >= 15.5 && new.precio <= 35.99);
            assert_eq!((new.precio * 100.0).round() / 100.0, new.precio);
            assert!(DESCRIPCIONES.contains(&new.descripcion.as_str()));
        }
    }

    #[test]
    fn test_links_are_distinct_and_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        let makis: Vec<i64> = (1..=30).collect();
        let ingredientes: Vec<i64> = (1..=12).collect();
        let links = generate_links(&mut rng, &makis, &ingredientes);

        let mut per_maki: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        for link in &links {
            assert!(per_maki
                .entry(link.maki_id)
                .or_default()
                .insert(link.ingrediente_id));
        }
        assert_eq!(per_maki.len(), 30);
        for used in per_maki.values() {
            assert!((MIN_LINKS_PER_MAKI..=MAX_LINKS_PER_MAKI).contains(&used.len()));
        }

        let few = generate_links(&mut rng, &makis, &[4]);
        assert!(few.iter().all(|l| l.ingrediente_id == 4));
        assert_eq!(few.len(), 30);
        assert!(generate_links(&mut rng, &makis, &[]).is_empty());
    }

    #[test]
    fn test_seed_replaces_catalog_and_export_writes_every_row() {
        let conn = test_connection();
        let mut rng = StdRng::seed_from_u64(3);
        seed(&mut rng, 5, 2, &conn).unwrap();
        let inserted = seed(&mut rng, 10, 4, &conn).unwrap();

        assert_eq!(query::find_all_ingredientes(&conn).unwrap().len(), 10);
        assert_eq!(query::find_all_makis(&conn).unwrap().len(), 4);
        let links = query::find_all_links(&conn).unwrap().len();
        assert_eq!(inserted, 14 + links);

        let mut out = Vec::new();
        let lines = export(&mut out, &conn).unwrap();
        assert_eq!(lines, inserted);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), lines);
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.is_object());
        }
    }
}

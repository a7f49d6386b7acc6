use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::breaker::{self, CircuitBreakerType};
use crate::cache::{MenuCache, INGREDIENTES_KEY, MAKIS_KEY};
use crate::db::{self, DbConnection, DbPool};
use crate::error::CatalogError;
use crate::models::{
    CreateMaki, Ingrediente, IngredienteChanges, Maki, MakiChanges, NewIngrediente,
    StockAdjustment,
};
use crate::query::{self, DeletePolicy};

const SERVICE_NAME: &str = "maki-menu-catalog";

/// Everything a handler needs to reach the store.
#[derive(Clone)]
pub(crate) struct AppState {
    pub pool: DbPool,
    pub breaker: CircuitBreakerType,
    pub cache: MenuCache,
    pub delete_policy: DeletePolicy,
}

impl AppState {
    /// Runs `f` on the blocking pool with a pooled connection, through the
    /// circuit breaker. On success the listed cache keys are dropped.
    async fn run<T, F>(&self, invalidates: &'static [&'static str], f: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&DbConnection) -> Result<T, CatalogError> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        web::block(move || {
            let result = breaker::guarded(&state.breaker, || {
                let conn = state.pool.get()?;
                f(&conn)
            })?;
            if !invalidates.is_empty() {
                state.cache.invalidate(invalidates);
            }
            Ok(result)
        })
        .await?
    }

    /// Full listing served from the cache when possible. A miss is filled
    /// under the generation read before loading, so a write that lands in
    /// between leaves the fill unreachable.
    async fn listing<T, F>(&self, key: &'static str, load: F) -> Result<Vec<T>, CatalogError>
    where
        F: FnOnce(&DbConnection) -> Result<Vec<T>, CatalogError> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let state = self.clone();
        web::block(move || {
            let (cached, generation) = state.cache.lookup::<T>(key);
            if let Some(rows) = cached {
                return Ok(rows);
            }
            let rows = breaker::guarded(&state.breaker, || {
                let conn = state.pool.get()?;
                load(&conn)
            })?;
            state.cache.store(key, generation, &rows);
            Ok(rows)
        })
        .await?
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    database: &'static str,
    cache: &'static str,
    timestamp: String,
}

#[get("/health")]
async fn health(state: web::Data<AppState>) -> HttpResponse {
    let pool = state.pool.clone();
    let connected = web::block(move || db::ping(&pool)).await.unwrap_or(false);
    let mut response = if connected {
        HttpResponse::Ok()
    } else {
        HttpResponse::ServiceUnavailable()
    };
    response.json(Health {
        status: if connected { "healthy" } else { "degraded" },
        service: SERVICE_NAME,
        database: if connected { "connected" } else { "disconnected" },
        cache: if state.cache.is_enabled() {
            "enabled"
        } else {
            "disabled"
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[get("/apis/ingredientes")]
async fn get_all_ingredientes(state: web::Data<AppState>) -> Result<HttpResponse, CatalogError> {
    let ingredientes = state
        .listing::<Ingrediente, _>(INGREDIENTES_KEY, query::find_all_ingredientes)
        .await?;
    Ok(HttpResponse::Ok().json(ingredientes))
}

#[post("/apis/ingredientes")]
async fn create_ingrediente(
    state: web::Data<AppState>,
    body: web::Json<NewIngrediente>,
) -> Result<HttpResponse, CatalogError> {
    let new = body.into_inner();
    let created = state
        .run(&[INGREDIENTES_KEY], move |conn| {
            query::create_ingrediente(&new, conn)
        })
        .await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/apis/ingredientes/{id}")]
async fn get_ingrediente(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let ingrediente = state
        .run(&[], move |conn| query::find_ingrediente(id, conn))
        .await?;
    Ok(HttpResponse::Ok().json(ingrediente))
}

#[put("/apis/ingredientes/{id}")]
async fn update_ingrediente(
    state: web::Data<AppState>,
    id: web::Path<i64>,
    body: web::Json<IngredienteChanges>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let changes = body.into_inner();
    let updated = state
        .run(&[INGREDIENTES_KEY], move |conn| {
            query::update_ingrediente(id, &changes, conn)
        })
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/apis/ingredientes/{id}")]
async fn delete_ingrediente(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let policy = state.delete_policy;
    state
        .run(&[INGREDIENTES_KEY], move |conn| {
            query::delete_ingrediente(id, policy, conn)
        })
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[patch("/apis/ingredientes/{id}/stock")]
async fn adjust_stock(
    state: web::Data<AppState>,
    id: web::Path<i64>,
    body: web::Json<StockAdjustment>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let delta = body.delta;
    let updated = state
        .run(&[INGREDIENTES_KEY], move |conn| {
            query::adjust_stock(id, delta, conn)
        })
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[get("/apis/ingredientes/{id}/makis")]
async fn get_makis_for_ingrediente(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let makis = state
        .run(&[], move |conn| query::find_makis_for_ingrediente(id, conn))
        .await?;
    Ok(HttpResponse::Ok().json(makis))
}

#[get("/apis/makis")]
async fn get_all_makis(state: web::Data<AppState>) -> Result<HttpResponse, CatalogError> {
    let makis = state
        .listing::<Maki, _>(MAKIS_KEY, query::find_all_makis)
        .await?;
    Ok(HttpResponse::Ok().json(makis))
}

#[post("/apis/makis")]
async fn create_maki(
    state: web::Data<AppState>,
    body: web::Json<CreateMaki>,
) -> Result<HttpResponse, CatalogError> {
    let request = body.into_inner();
    let created = state
        .run(&[MAKIS_KEY], move |conn| query::create_maki(&request, conn))
        .await?;
    Ok(HttpResponse::Created().json(created))
}

#[get("/apis/makis/{id}")]
async fn get_maki(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let maki = state.run(&[], move |conn| query::find_maki(id, conn)).await?;
    Ok(HttpResponse::Ok().json(maki))
}

#[put("/apis/makis/{id}")]
async fn update_maki(
    state: web::Data<AppState>,
    id: web::Path<i64>,
    body: web::Json<MakiChanges>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let changes = body.into_inner();
    let updated = state
        .run(&[MAKIS_KEY], move |conn| query::update_maki(id, &changes, conn))
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/apis/makis/{id}")]
async fn delete_maki(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let policy = state.delete_policy;
    state
        .run(&[MAKIS_KEY], move |conn| query::delete_maki(id, policy, conn))
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/apis/makis/{id}/ingredientes")]
async fn get_ingredientes_for_maki(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let ingredientes = state
        .run(&[], move |conn| query::find_ingredientes_for_maki(id, conn))
        .await?;
    Ok(HttpResponse::Ok().json(ingredientes))
}

#[put("/apis/makis/{id}/ingredientes/{ingrediente_id}")]
async fn link_ingrediente(
    state: web::Data<AppState>,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, CatalogError> {
    let (maki_id, ingrediente_id) = path.into_inner();
    state
        .run(&[], move |conn| {
            query::link_ingrediente(maki_id, ingrediente_id, conn)
        })
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/apis/makis/{id}/ingredientes/{ingrediente_id}")]
async fn unlink_ingrediente(
    state: web::Data<AppState>,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, CatalogError> {
    let (maki_id, ingrediente_id) = path.into_inner();
    state
        .run(&[], move |conn| {
            query::unlink_ingrediente(maki_id, ingrediente_id, conn)
        })
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/apis/makis/{id}/disponibilidad")]
async fn get_disponibilidad(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, CatalogError> {
    let id = id.into_inner();
    let disponibilidad = state
        .run(&[], move |conn| query::find_disponibilidad(id, conn))
        .await?;
    Ok(HttpResponse::Ok().json(disponibilidad))
}

pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        CatalogError::validation("body", err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        CatalogError::validation("path", err.to_string()).into()
    }))
    .service(health)
        .service(get_all_ingredientes)
        .service(create_ingrediente)
        .service(get_ingrediente)
        .service(update_ingrediente)
        .service(delete_ingrediente)
        .service(adjust_stock)
        .service(get_makis_for_ingrediente)
        .service(get_all_makis)
        .service(create_maki)
        .service(get_maki)
        .service(update_maki)
        .service(delete_maki)
        .service(get_ingredientes_for_maki)
        .service(link_ingrediente)
        .service(unlink_ingrediente)
        .service(get_disponibilidad);
}

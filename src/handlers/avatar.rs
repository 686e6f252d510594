// src/handlers/avatar.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use crate::mojang::avatar_url;
use crate::utils::RequestError;

#[derive(Deserialize)]
pub struct AvatarQuery {
    uuid: Option<String>,
}

pub async fn get_avatar(query: web::Query<AvatarQuery>) -> Result<HttpResponse, RequestError> {
    let raw = query
        .uuid
        .as_deref()
        .ok_or(RequestError::MissingParameter("uuid"))?;
    let uuid = Uuid::parse_str(raw.trim()).map_err(|_| RequestError::InvalidParameter("uuid"))?;

    Ok(HttpResponse::Ok().json(json!({
        "uuid": uuid,
        "avatarUrl": avatar_url(&uuid),
    })))
}

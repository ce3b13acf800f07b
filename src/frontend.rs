//! 嵌入式静态资源：上传表单与附属文件。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use rust_embed::RustEmbed;
use std::borrow::Cow;
use std::sync::Arc;

use crate::config::FORM_ASSET;
use crate::error::ApiError;

/// 只读静态资源来源。
pub trait AssetSource: Send + Sync {
    fn read(&self, name: &str) -> Option<Cow<'static, [u8]>>;
}

pub type SharedAssets = Arc<dyn AssetSource>;

#[derive(RustEmbed)]
#[folder = "web"]
/// 编译期嵌入的 `web/` 目录。
pub struct EmbeddedAssets;

impl AssetSource for EmbeddedAssets {
    fn read(&self, name: &str) -> Option<Cow<'static, [u8]>> {
        EmbeddedAssets::get(name).map(|asset| asset.data)
    }
}

/// `GET /upload`：原样返回上传表单。
pub async fn upload_form(
    Extension(assets): Extension<SharedAssets>,
) -> Result<Response, ApiError> {
    let Some(response) = load_asset(assets.as_ref(), FORM_ASSET)? else {
        return Err(ApiError::Internal(format!("{FORM_ASSET} is not embedded")));
    };
    Ok(response)
}

/// 静态资源回退处理器，`/` 对应表单页。
pub async fn serve_asset(
    Extension(assets): Extension<SharedAssets>,
    req: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound("not found".into());
    let decoded = percent_decode_str(req.uri().path())
        .decode_utf8()
        .map_err(|_| not_found())?;
    let path = decoded.trim_start_matches('/');
    let requested = if path.is_empty() { FORM_ASSET } else { path };
    load_asset(assets.as_ref(), requested)?.ok_or_else(not_found)
}

fn load_asset(assets: &dyn AssetSource, path: &str) -> Result<Option<Response>, ApiError> {
    let Some(data) = assets.read(path) else {
        return Ok(None);
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    Ok(Some((headers, AxumBody::from(data.into_owned())).into_response()))
}

use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Response};

use crate::error::{Error, ErrorDetails};

pub async fn handle_404(method: Method, uri: Uri) -> Response {
    Error::new(ErrorDetails::RouteNotFound {
        path: uri.path().to_string(),
        method: method.to_string(),
    })
    .into_response()
}

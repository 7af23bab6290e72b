use axum::response::{IntoResponse, Redirect, Response};
use url::Url;

/// Redirects the browser back to the front end with the given query pairs.
pub(super) fn frontend_redirect(frontend_url: &str, params: &[(&str, &str)]) -> Response {
    let target = match Url::parse(frontend_url) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in params {
                    pairs.append_pair(key, value);
                }
            }
            url.to_string()
        }
        Err(_) => frontend_url.to_string(),
    };

    Redirect::to(&target).into_response()
}

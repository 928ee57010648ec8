use crate::model::{format_timestamp, parse_timestamp, CameraId, Session, Timestamp};
use std::fmt;
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Cameras,
    Camera(CameraId),
    Segment {
        id: CameraId,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route matches `{0}`")]
    NotFound(String),
    #[error("invalid camera id `{0}`")]
    InvalidId(String),
}

fn encode_component(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn parse_id(raw: &str) -> Result<CameraId, RouteError> {
    raw.parse().map_err(|_| RouteError::InvalidId(raw.to_string()))
}

impl Route {
    pub fn segment(id: CameraId, start: Timestamp, end: Timestamp) -> Self {
        Route::Segment {
            id,
            start: Some(start),
            end: Some(end),
        }
    }

    /// `/` redirects to `/login`; empty path segments are ignored.
    pub fn parse(input: &str) -> Result<Route, RouteError> {
        let (path, query) = match input.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (input, None),
        };
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        match parts.as_slice() {
            [] | ["login"] => Ok(Route::Login),
            ["cameras"] => Ok(Route::Cameras),
            ["cameras", id] => Ok(Route::Camera(parse_id(id)?)),
            ["segment", id] => {
                let id = parse_id(id)?;
                let mut start = None;
                let mut end = None;
                for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
                    let parsed = match parse_timestamp(&value) {
                        Ok(ts) => Some(ts),
                        Err(e) => {
                            tracing::warn!("ignoring unparsable `{}` query value {:?}: {}", key, value, e);
                            None
                        }
                    };
                    match key.as_ref() {
                        "start" => start = parsed,
                        "end" => end = parsed,
                        _ => {}
                    }
                }
                Ok(Route::Segment { id, start, end })
            }
            _ => Err(RouteError::NotFound(input.to_string())),
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Route::Login)
    }

    /// Where navigation actually lands given the current session.
    pub fn guard(self, session: Option<&Session>) -> Route {
        match (self, session) {
            (route, None) if route.requires_session() => {
                tracing::debug!("no session, redirecting {} to /login", route);
                Route::Login
            }
            (Route::Login, Some(_)) => Route::Cameras,
            (route, _) => route,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Login => write!(f, "/login"),
            Route::Cameras => write!(f, "/cameras"),
            Route::Camera(id) => write!(f, "/cameras/{id}"),
            Route::Segment { id, start, end } => {
                write!(f, "/segment/{id}")?;
                let mut sep = '?';
                if let Some(start) = start {
                    write!(f, "{sep}start={}", encode_component(&format_timestamp(start)))?;
                    sep = '&';
                }
                if let Some(end) = end {
                    write!(f, "{sep}end={}", encode_component(&format_timestamp(end)))?;
                }
                Ok(())
            }
        }
    }
}

use crate::api::{ApiClient, ApiError};
use crate::model::{Camera, CameraId};
use crate::router::Route;

#[derive(Debug, Clone, PartialEq)]
pub struct CameraCard {
    pub id: CameraId,
    pub name: String,
    pub status: String,
    pub has_recording: bool,
}

impl From<&Camera> for CameraCard {
    fn from(camera: &Camera) -> Self {
        CameraCard {
            id: camera.id,
            name: camera.name.clone(),
            status: camera.status.clone().unwrap_or_else(|| "unknown".to_string()),
            has_recording: camera.has_recording,
        }
    }
}

impl CameraCard {
    pub fn route(&self) -> Route {
        Route::Camera(self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraListView {
    pub total: u64,
    pub cards: Vec<CameraCard>,
}

impl CameraListView {
    /// Only the first page is shown; `total` reports what the API knows about.
    pub async fn load(api: &ApiClient) -> Result<Self, ApiError> {
        let page = api.cameras().await?;
        if page.next.is_some() {
            tracing::debug!("camera list has more pages; showing the first {}", page.results.len());
        }
        Ok(CameraListView {
            total: page.count,
            cards: page.results.iter().map(CameraCard::from).collect(),
        })
    }

    pub fn select(&self, id: CameraId) -> Option<Route> {
        self.cards.iter().find(|c| c.id == id).map(CameraCard::route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{camera_json, client_for};
    use crate::model::Session;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_load_and_select() {
        let server = MockServer::start().await;
        let mut online = camera_json(2, json!([]));
        online["status"] = json!("online");
        Mock::given(method("GET"))
            .and(path("/api/cameras/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "next": null,
                "previous": null,
                "results": [camera_json(1, json!([])), online],
            })))
            .mount(&server)
            .await;

        let api = client_for(&server).with_session(&Session { token: "t".into() });
        let view = CameraListView::load(&api).await.unwrap();

        assert_eq!(view.total, 2);
        assert_eq!(view.cards[0].status, "unknown");
        assert_eq!(view.cards[1].status, "online");
        assert_eq!(view.select(2), Some(Route::Camera(2)));
        assert_eq!(view.select(99), None);
    }
}

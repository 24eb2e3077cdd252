//! Cloud gateway backed by the Yandex Compute REST API.
//!
//! Every method is one authenticated round trip (plus pagination for
//! listings). Operations are not awaited; the returned [`OperationResult`]
//! only reflects what the provider reported when it accepted the request.

mod types;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::CloudConfig;
use crate::gateway::{
    CloudGateway, CreateInstanceRequest, GatewayError, GatewayFuture, InstanceFilter,
    OperationResult,
};
use crate::instance::CloudInstance;

use types::{InstanceWire, ListInstancesResponse, OperationWire};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const INSTANCES_PATH: &str = "/compute/v1/instances";

/// Gateway speaking to the Compute API with an IAM bearer token.
#[derive(Clone, Debug)]
pub struct YandexGateway {
    client: Client,
    endpoint: String,
    iam_token: String,
}

impl YandexGateway {
    /// Creates a gateway for `endpoint` authenticating with `iam_token`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn new(endpoint: &str, iam_token: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().trim_end_matches('/').to_owned(),
            iam_token: iam_token.into(),
        })
    }

    /// Creates a gateway from the cloud account configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn from_config(config: &CloudConfig) -> Result<Self, GatewayError> {
        Self::new(&config.api_endpoint, config.iam_token.clone())
    }

    fn instances_url(&self) -> String {
        format!("{}{INSTANCES_PATH}", self.endpoint)
    }

    fn instance_url(&self, instance_id: &str) -> String {
        format!("{}{INSTANCES_PATH}/{instance_id}", self.endpoint)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        request
            .bearer_auth(&self.iam_token)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }

    async fn expect_success(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(GatewayError::Provider {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))
    }

    async fn operation(&self, request: RequestBuilder) -> Result<OperationResult, GatewayError> {
        let response = Self::expect_success(self.send(request).await?).await?;
        let wire: OperationWire = Self::decode(response).await?;
        Ok(wire.into())
    }

    async fn list_page(
        &self,
        filter: &InstanceFilter,
        page_token: Option<&str>,
    ) -> Result<ListInstancesResponse, GatewayError> {
        let mut query = vec![
            ("folderId", filter.folder_id.clone()),
            ("filter", filter.expression()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_owned()));
        }
        let request = self.client.get(self.instances_url()).query(&query);
        let response = Self::expect_success(self.send(request).await?).await?;
        Self::decode(response).await
    }
}

impl CloudGateway for YandexGateway {
    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> GatewayFuture<'a, Vec<CloudInstance>> {
        Box::pin(async move {
            let mut instances = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let page = self.list_page(filter, page_token.as_deref()).await?;
                let next = page.next_page().map(str::to_owned);
                instances.extend(page.instances.into_iter().map(CloudInstance::from));
                let Some(token) = next else {
                    break;
                };
                page_token = Some(token);
            }
            debug!(
                folder_id = %filter.folder_id,
                filter = %filter.expression(),
                count = instances.len(),
                "listed instances"
            );
            Ok(instances)
        })
    }

    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, Option<CloudInstance>> {
        Box::pin(async move {
            let response = self
                .send(self.client.get(self.instance_url(instance_id)))
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let wire: InstanceWire = Self::decode(Self::expect_success(response).await?).await?;
            Ok(Some(wire.into()))
        })
    }

    fn start_instance<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, OperationResult> {
        Box::pin(async move {
            let url = format!("{}:start", self.instance_url(instance_id));
            self.operation(self.client.post(url).json(&serde_json::Map::new()))
                .await
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> GatewayFuture<'a, OperationResult> {
        Box::pin(async move {
            self.operation(self.client.post(self.instances_url()).json(request.body()))
                .await
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, OperationResult> {
        Box::pin(async move {
            self.operation(self.client.delete(self.instance_url(instance_id)))
                .await
        })
    }
}

//! External scaler protobuf bindings
//!
//! Wire types and service glue for the KEDA external scaler protocol
//! (`proto/externalscaler.proto`). With the `proto-gen` feature the code is
//! generated at build time by tonic-build; otherwise the checked-in
//! equivalent below is used so the crate builds without protoc.

#[cfg(feature = "proto-gen")]
pub mod externalscaler {
    tonic::include_proto!("externalscaler");
}

#[cfg(not(feature = "proto-gen"))]
pub mod externalscaler {
    use prost::Message;
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, Message)]
    pub struct ScaledObjectRef {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub namespace: String,
        #[prost(map = "string, string", tag = "3")]
        pub scaler_metadata: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct IsActiveResponse {
        #[prost(bool, tag = "1")]
        pub result: bool,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetMetricSpecResponse {
        #[prost(message, repeated, tag = "1")]
        pub metric_specs: Vec<MetricSpec>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct MetricSpec {
        #[prost(string, tag = "1")]
        pub metric_name: String,
        #[prost(int64, tag = "2")]
        pub target_size: i64,
        #[prost(double, tag = "3")]
        pub target_size_float: f64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetMetricsRequest {
        #[prost(message, optional, tag = "1")]
        pub scaled_object_ref: Option<ScaledObjectRef>,
        #[prost(string, tag = "2")]
        pub metric_name: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetMetricsResponse {
        #[prost(message, repeated, tag = "1")]
        pub metric_values: Vec<MetricValue>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct MetricValue {
        #[prost(string, tag = "1")]
        pub metric_name: String,
        #[prost(int64, tag = "2")]
        pub metric_value: i64,
        #[prost(double, tag = "3")]
        pub metric_value_float: f64,
    }

    pub mod external_scaler_client {
        use super::*;
        use tonic::codegen::*;
        use tonic::transport::Uri;

        #[derive(Debug, Clone)]
        pub struct ExternalScalerClient<T> {
            inner: tonic::client::Grpc<T>,
        }

        impl ExternalScalerClient<tonic::transport::Channel> {
            pub fn new(channel: tonic::transport::Channel) -> Self {
                let inner = tonic::client::Grpc::new(channel);
                Self { inner }
            }
        }

        impl<T> ExternalScalerClient<T>
        where
            T: tonic::client::GrpcService<tonic::body::BoxBody>,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + Send,
        {
            pub fn with_origin(inner: T, origin: Uri) -> Self {
                let inner = tonic::client::Grpc::with_origin(inner, origin);
                Self { inner }
            }

            async fn ready(&mut self) -> Result<(), tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })
            }

            pub async fn is_active(
                &mut self,
                request: impl tonic::IntoRequest<ScaledObjectRef>,
            ) -> Result<tonic::Response<IsActiveResponse>, tonic::Status> {
                self.ready().await?;
                let codec = tonic::codec::ProstCodec::default();
                let path =
                    http::uri::PathAndQuery::from_static("/externalscaler.ExternalScaler/IsActive");
                self.inner.unary(request.into_request(), path, codec).await
            }

            pub async fn get_metric_spec(
                &mut self,
                request: impl tonic::IntoRequest<ScaledObjectRef>,
            ) -> Result<tonic::Response<GetMetricSpecResponse>, tonic::Status> {
                self.ready().await?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static(
                    "/externalscaler.ExternalScaler/GetMetricSpec",
                );
                self.inner.unary(request.into_request(), path, codec).await
            }

            pub async fn get_metrics(
                &mut self,
                request: impl tonic::IntoRequest<GetMetricsRequest>,
            ) -> Result<tonic::Response<GetMetricsResponse>, tonic::Status> {
                self.ready().await?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static(
                    "/externalscaler.ExternalScaler/GetMetrics",
                );
                self.inner.unary(request.into_request(), path, codec).await
            }
        }
    }

    pub mod external_scaler_server {
        #![allow(clippy::let_unit_value)]
        use super::*;
        use tonic::codegen::*;

        #[async_trait]
        pub trait ExternalScaler: Send + Sync + 'static {
            async fn is_active(
                &self,
                request: tonic::Request<ScaledObjectRef>,
            ) -> std::result::Result<tonic::Response<IsActiveResponse>, tonic::Status>;

            async fn get_metric_spec(
                &self,
                request: tonic::Request<ScaledObjectRef>,
            ) -> std::result::Result<tonic::Response<GetMetricSpecResponse>, tonic::Status>;

            async fn get_metrics(
                &self,
                request: tonic::Request<GetMetricsRequest>,
            ) -> std::result::Result<tonic::Response<GetMetricsResponse>, tonic::Status>;
        }

        #[derive(Debug)]
        pub struct ExternalScalerServer<T: ExternalScaler> {
            inner: Arc<T>,
        }

        impl<T: ExternalScaler> ExternalScalerServer<T> {
            pub fn new(inner: T) -> Self {
                Self::from_arc(Arc::new(inner))
            }

            pub fn from_arc(inner: Arc<T>) -> Self {
                Self { inner }
            }
        }

        impl<T: ExternalScaler> Clone for ExternalScalerServer<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: Arc::clone(&self.inner),
                }
            }
        }

        struct IsActiveSvc<T: ExternalScaler>(Arc<T>);

        impl<T: ExternalScaler> tonic::server::UnaryService<ScaledObjectRef> for IsActiveSvc<T> {
            type Response = IsActiveResponse;
            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

            fn call(&mut self, request: tonic::Request<ScaledObjectRef>) -> Self::Future {
                let inner = Arc::clone(&self.0);
                Box::pin(async move { inner.is_active(request).await })
            }
        }

        struct GetMetricSpecSvc<T: ExternalScaler>(Arc<T>);

        impl<T: ExternalScaler> tonic::server::UnaryService<ScaledObjectRef>
            for GetMetricSpecSvc<T>
        {
            type Response = GetMetricSpecResponse;
            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

            fn call(&mut self, request: tonic::Request<ScaledObjectRef>) -> Self::Future {
                let inner = Arc::clone(&self.0);
                Box::pin(async move { inner.get_metric_spec(request).await })
            }
        }

        struct GetMetricsSvc<T: ExternalScaler>(Arc<T>);

        impl<T: ExternalScaler> tonic::server::UnaryService<GetMetricsRequest> for GetMetricsSvc<T> {
            type Response = GetMetricsResponse;
            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

            fn call(&mut self, request: tonic::Request<GetMetricsRequest>) -> Self::Future {
                let inner = Arc::clone(&self.0);
                Box::pin(async move { inner.get_metrics(request).await })
            }
        }

        impl<T, B> tonic::codegen::Service<http::Request<B>> for ExternalScalerServer<T>
        where
            T: ExternalScaler,
            B: Body + Send + 'static,
            B::Error: Into<StdError> + Send + 'static,
        {
            type Response = http::Response<tonic::body::BoxBody>;
            type Error = std::convert::Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;

            fn poll_ready(
                &mut self,
                _cx: &mut Context<'_>,
            ) -> Poll<std::result::Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<B>) -> Self::Future {
                let inner = Arc::clone(&self.inner);
                match req.uri().path() {
                    "/externalscaler.ExternalScaler/IsActive" => Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.unary(IsActiveSvc(inner), req).await)
                    }),
                    "/externalscaler.ExternalScaler/GetMetricSpec" => Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.unary(GetMetricSpecSvc(inner), req).await)
                    }),
                    "/externalscaler.ExternalScaler/GetMetrics" => Box::pin(async move {
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        Ok(grpc.unary(GetMetricsSvc(inner), req).await)
                    }),
                    _ => Box::pin(async move {
                        // grpc-status 12 = UNIMPLEMENTED
                        Ok(http::Response::builder()
                            .status(200)
                            .header("grpc-status", "12")
                            .header("content-type", "application/grpc")
                            .body(empty_body())
                            .unwrap())
                    }),
                }
            }
        }

        impl<T: ExternalScaler> tonic::server::NamedService for ExternalScalerServer<T> {
            const NAME: &'static str = "externalscaler.ExternalScaler";
        }
    }
}

pub use externalscaler::external_scaler_client::ExternalScalerClient;
pub use externalscaler::external_scaler_server::{ExternalScaler, ExternalScalerServer};
pub use externalscaler::*;

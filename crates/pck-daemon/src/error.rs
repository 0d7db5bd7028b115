//! HTTP mapping of workflow failures.
//!
//! Every error leaves as `{"erro": "<message>"}` with the operator-facing
//! Portuguese message the scanning page shows verbatim. Server-side causes
//! are logged here, once, with the full error chain.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pck_session::{OrderNumberError, ScanError};
use tracing::{error, info, warn};

use crate::api_types::ErrorBody;
use crate::workflow::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    InvalidOrderNumber(#[from] OrderNumberError),
    /// Scan body missing, not JSON, or without a usable `codigo`.
    #[error("malformed scan body: {0}")]
    MalformedScan(#[from] JsonRejection),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidOrderNumber(_) | ApiError::MalformedScan(_) => StatusCode::BAD_REQUEST,
            ApiError::Workflow(err) => match err {
                WorkflowError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
                WorkflowError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::AlreadyVerified(_) => StatusCode::CONFLICT,
                WorkflowError::NoActiveOrder | WorkflowError::Scan(_) => StatusCode::BAD_REQUEST,
                WorkflowError::Gateway(_) | WorkflowError::Aborted(..) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Message shown to the operator.
    pub fn message(&self) -> &'static str {
        match self {
            ApiError::InvalidOrderNumber(_) => "Número de pedido inválido",
            ApiError::MalformedScan(_) => "Produto não pertence ao pedido",
            ApiError::Workflow(err) => match err {
                WorkflowError::Busy(_) => "Aguarde, pedido em processamento...",
                WorkflowError::OrderNotFound(_) => "Pedido não encontrado",
                WorkflowError::AlreadyVerified(_) => "ESTE PEDIDO JÁ FOI VERIFICADO",
                WorkflowError::NoActiveOrder => "Pedido não carregado",
                WorkflowError::Scan(ScanError::NotInOrder { .. }) => "Produto não pertence ao pedido",
                WorkflowError::Scan(ScanError::QuantityExceeded { .. }) => "Quantidade excedida",
                WorkflowError::Gateway(_) => "Erro ao comunicar com o Bling",
                WorkflowError::Aborted(..) => "Erro interno, tente novamente",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(error = %self, "request refused");
        } else {
            info!(error = %self, "request refused");
        }

        let body = ErrorBody {
            erro: self.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

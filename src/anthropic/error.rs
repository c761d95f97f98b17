//! Erros do cliente da API Anthropic.
//!
//! [`AnthropicError`] separa os três casos que o chamador precisa distinguir
//! para decidir sobre retentativas: rate limit, erro HTTP da API e falha de rede.

use thiserror::Error;

/// Erros que podem ocorrer ao chamar o endpoint de mensagens.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after` (padrão 1s).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outra resposta não-2xx, com o corpo como mensagem.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// DNS, conexão recusada, timeout do transporte ou corpo ilegível.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

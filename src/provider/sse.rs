//! Minimal server-sent-events decoder shared by the streaming providers.

use super::{map_transport_error, ProviderError, ProviderKind};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;

struct DecoderState<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
    provider: ProviderKind,
}

/// Turn a raw byte stream into the payloads of its `data:` lines.
///
/// Lines may be split across chunks; partial lines are buffered until
/// their terminating newline arrives. Comment and `event:` lines are
/// dropped.
pub(crate) fn data_lines<S, B>(
    provider: ProviderKind,
    bytes: S,
) -> BoxStream<'static, Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecoderState {
        inner: bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
        provider,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.pending.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    drain_lines(&mut st.buffer, &mut st.pending);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(map_transport_error(st.provider, e)), st));
                }
                None => {
                    st.done = true;
                    if !st.buffer.is_empty() {
                        st.buffer.push(b'\n');
                        drain_lines(&mut st.buffer, &mut st.pending);
                    }
                }
            }
        }
    })
    .boxed()
}

fn drain_lines(buffer: &mut Vec<u8>, out: &mut VecDeque<String>) {
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\n', '\r']);
        if let Some(data) = line.strip_prefix("data:") {
            out.push_back(data.trim_start().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_split_across_chunks_are_reassembled() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"event: delta\ndata: {\"a\"".to_vec()),
            Ok(b":1}\n\ndata: [DONE]".to_vec()),
        ];
        let out: Vec<String> = data_lines(ProviderKind::OpenAi, stream::iter(chunks))
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(b"data: hello\r\n\r\ndata: world\r\n".to_vec())];
        let out: Vec<String> = data_lines(ProviderKind::Anthropic, stream::iter(chunks))
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;
        assert_eq!(out, vec!["hello".to_string(), "world".to_string()]);
    }
}

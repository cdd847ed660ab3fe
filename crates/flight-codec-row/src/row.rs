use bytes::{BufMut, Bytes, BytesMut};
use flight_core::{FlightError, RowId, observability::targets};

const NEWLINE: u8 = b'\n';
const SEPARATOR: u8 = b':';

/// 行标签，决定负载的解释方式。
///
/// 模型行没有标签字符，其余标签各占一个大写字母；
/// JSON 负载不可能以这些字母开头，因此标签与模型负载不会混淆。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RowTag {
    /// 结构化模型（扩展 JSON）。
    Model,
    /// 模块引用（`I`）。
    Module,
    /// 旁路提示（`H`）。
    Hint,
    /// 错误（`E`）。
    Error,
    /// 符号（`S`）。
    Symbol,
    /// 暂缓 / 阻塞（`P`）。
    Postpone,
}

impl RowTag {
    /// 标签字符；模型行返回 `None`。
    pub fn marker(self) -> Option<u8> {
        match self {
            RowTag::Model => None,
            RowTag::Module => Some(b'I'),
            RowTag::Hint => Some(b'H'),
            RowTag::Error => Some(b'E'),
            RowTag::Symbol => Some(b'S'),
            RowTag::Postpone => Some(b'P'),
        }
    }

    fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(RowTag::Module),
            b'H' => Some(RowTag::Hint),
            b'E' => Some(RowTag::Error),
            b'S' => Some(RowTag::Symbol),
            b'P' => Some(RowTag::Postpone),
            _ => None,
        }
    }
}

/// 一个完整的行。
///
/// `payload` 是标签之后、换行之前的原始字节，与输入缓冲共享内存。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Row {
    /// 行标识符。
    pub id: RowId,
    /// 行标签。
    pub tag: RowTag,
    /// 原始负载。
    pub payload: Bytes,
}

impl Row {
    /// 以 UTF-8 文本读取负载。
    pub fn payload_str(&self) -> Result<&str, FlightError> {
        core::str::from_utf8(&self.payload).map_err(|err| FlightError::InvalidPayload {
            id: self.id,
            reason: format!("payload is not valid UTF-8: {err}"),
        })
    }
}

/// 编码单行：`<id>:<标签?><payload>\n`。
///
/// # 教案式说明
/// - **意图 (Why)**：保证所有行都经过同一出口，标签字符与换行不会被遗漏；
/// - **契约 (What)**：`payload` 不得包含换行，否则返回 [`FlightError::MalformedRow`]；
///   调用方传入的 JSON 由 `serde_json` 生成时天然满足该条件；
/// - **风险 (Trade-offs)**：每行一次分配，换取返回值可以直接交给输出端。
pub fn encode_row(id: RowId, tag: RowTag, payload: &str) -> Result<Bytes, FlightError> {
    if payload.as_bytes().contains(&NEWLINE) {
        return Err(FlightError::MalformedRow {
            reason: format!("payload for row {id} contains a raw newline"),
        });
    }
    let id_text = id.to_string();
    let mut buffer = BytesMut::with_capacity(id_text.len() + payload.len() + 3);
    buffer.put_slice(id_text.as_bytes());
    buffer.put_u8(SEPARATOR);
    if let Some(marker) = tag.marker() {
        buffer.put_u8(marker);
    }
    buffer.put_slice(payload.as_bytes());
    buffer.put_u8(NEWLINE);
    Ok(buffer.freeze())
}

/// 无状态解码：从 `buf` 中取出所有完整行。
///
/// 返回 `(行, 已消费字节数)`；未消费的尾部由调用方保留，下一次与新数据拼接后再解码。
/// `max_row_bytes` 限制单行（不含换行）长度，尚未出现换行但已超限的尾部同样报错。
pub fn decode_rows(
    buf: &[u8],
    max_row_bytes: Option<usize>,
) -> Result<(Vec<Row>, usize), FlightError> {
    let shared = Bytes::copy_from_slice(buf);
    let mut rows = Vec::new();
    let mut consumed = 0;
    while let Some(pos) = shared[consumed..].iter().position(|byte| *byte == NEWLINE) {
        check_budget(pos, max_row_bytes)?;
        rows.push(parse_line(shared.slice(consumed..consumed + pos))?);
        consumed += pos + 1;
    }
    check_budget(shared.len() - consumed, max_row_bytes)?;
    Ok((rows, consumed))
}

/// 可恢复的增量解码器。
///
/// # 教案式说明
/// - **意图 (Why)**：字节块可能在任意位置切断一行（甚至切断一个 UTF-8 字符），
///   解码器需要记住尾部并在下一块到达时继续；
/// - **逻辑 (How)**：新数据追加到内部 `BytesMut`，逐个查找换行并 `split_to` 冻结出整行，
///   行内负载以 `Bytes::slice` 共享内存；
/// - **契约 (What)**：部分输入返回空列表且不丢数据；`finish` 在仍有残留时返回
///   [`FlightError::TruncatedRow`]；
/// - **风险 (Trade-offs)**：预算检查发生在追加之后，一块超大输入会先被复制再报错。
#[derive(Debug, Default)]
pub struct RowDecoder {
    buffer: BytesMut,
    max_row_bytes: Option<usize>,
}

impl RowDecoder {
    /// 构造不限行长的解码器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造带单行预算的解码器。
    pub fn with_max_row_bytes(max_row_bytes: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_row_bytes,
        }
    }

    /// 追加一块输入，随后用 [`RowDecoder::next_row`] 逐行取出。
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// 取出下一条完整的行；缓冲区中没有完整行时返回 `Ok(None)`。
    ///
    /// 出错之前取出的行不受影响，调用方可以先应用它们，再处理这一行的错误。
    pub fn next_row(&mut self) -> Result<Option<Row>, FlightError> {
        match self.buffer.iter().position(|byte| *byte == NEWLINE) {
            Some(pos) => {
                check_budget(pos, self.max_row_bytes)?;
                let mut line = self.buffer.split_to(pos + 1).freeze();
                line.truncate(pos);
                let row = parse_line(line)?;
                tracing::trace!(
                    target: targets::CODEC,
                    id = %row.id,
                    pending = self.buffer.len(),
                    "decoded row"
                );
                Ok(Some(row))
            }
            None => {
                check_budget(self.buffer.len(), self.max_row_bytes)?;
                Ok(None)
            }
        }
    }

    /// 追加一块输入并返回其中所有新完成的行。
    ///
    /// 任一行出错时整批返回错误；需要保留错误之前的行时使用
    /// [`RowDecoder::push`] 与 [`RowDecoder::next_row`]。
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Row>, FlightError> {
        self.push(chunk);
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// 尚未组成完整行的字节数。
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 输入结束时调用：残留字节意味着最后一行被截断。
    pub fn finish(&self) -> Result<(), FlightError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FlightError::TruncatedRow {
                len: self.buffer.len(),
            })
        }
    }
}

fn check_budget(len: usize, limit: Option<usize>) -> Result<(), FlightError> {
    match limit {
        Some(limit) if len > limit => Err(FlightError::RowBudgetExceeded { len, limit }),
        _ => Ok(()),
    }
}

fn parse_line(line: Bytes) -> Result<Row, FlightError> {
    let separator = line
        .iter()
        .position(|byte| *byte == SEPARATOR)
        .ok_or_else(|| FlightError::MalformedRow {
            reason: format!("missing `:` in row `{}`", String::from_utf8_lossy(&line)),
        })?;
    let id_text = core::str::from_utf8(&line[..separator]).map_err(|_| FlightError::MalformedRow {
        reason: "row id is not valid UTF-8".to_owned(),
    })?;
    let id = RowId::parse_hex(id_text)?;

    let rest = separator + 1;
    let (tag, payload_start) = match line.get(rest).copied().and_then(RowTag::from_marker) {
        Some(tag) => (tag, rest + 1),
        None => (RowTag::Model, rest),
    };
    Ok(Row {
        id,
        tag,
        payload: line.slice(payload_start..),
    })
}

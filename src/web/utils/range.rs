/// 单段字节区间，`end` 为开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// 区间内的字节数
    pub fn byte_len(&self) -> u64 {
        self.end - self.start
    }

    /// `Content-Range` 头的值
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// 无效或不支持的 Range（多段等），按完整响应处理
    Full,
    Partial(ByteRange),
    Unsatisfiable,
}

/// 解析 `Range: bytes=...`，仅支持单段
pub fn parse_range(header: &str, length: u64) -> RangeOutcome {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // 后缀区间：最后 N 个字节
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || length == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial(ByteRange {
            start: length.saturating_sub(suffix),
            end: length,
        });
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        length
    } else {
        match last.parse::<u64>() {
            Ok(value) if value >= start => value.saturating_add(1).min(length),
            _ => return RangeOutcome::Full,
        }
    };

    if start >= length {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial(ByteRange { start, end })
}

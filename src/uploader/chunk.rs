// 上传分片
//
// 分片规则（由直传票据的 chunk_size 决定）：
// - chunk_size == 0：不分片，单次请求上传整个文件
// - chunk_size > 0：按 chunk_size 切分为 ⌈S/C⌉ 个连续、不重叠的分片，
//   覆盖 [0, S)，严格按索引顺序逐个上传
//
// 每个分片请求携带 Content-Range: bytes {start}-{end-1}/{total}

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// 上传分片信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围（end 不包含）
    pub range: Range<u64>,
}

impl UploadChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// Content-Range 头的值
    ///
    /// 空文件没有可表示的字节区间，使用 `bytes */0`
    pub fn content_range(&self, total_size: u64) -> String {
        if self.size() == 0 {
            format!("bytes */{}", total_size)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.range.start,
                self.range.end - 1,
                total_size
            )
        }
    }

    /// 读取分片数据
    ///
    /// 在阻塞线程池中定位并读取，避免阻塞运行时
    pub async fn read_data(&self, file_path: &Path) -> std::io::Result<Vec<u8>> {
        let file_path = file_path.to_path_buf();
        let start = self.range.start;
        let size = self.size() as usize;
        let index = self.index;

        let buffer = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut file = std::fs::File::open(&file_path)?;
            file.seek(SeekFrom::Start(start))?;

            let mut buffer = vec![0u8; size];
            file.read_exact(&mut buffer)?;
            Ok(buffer)
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!(
            "读取分片 #{}: offset={}, 大小={} bytes",
            index,
            start,
            buffer.len()
        );

        Ok(buffer)
    }
}

/// 分片计划
///
/// 分片按索引即时计算，不预先生成列表（票据给出的分片大小可能极小）
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    /// 文件总大小
    total_size: u64,
    /// 分片大小
    chunk_size: u64,
    /// 分片数量（空文件为 1）
    chunk_count: u64,
}

impl ChunkPlan {
    /// 按票据给出的分片大小切分文件
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `chunk_size` - 分片大小，必须大于 0
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        debug_assert!(chunk_size > 0, "chunk_size 必须大于 0");
        let chunk_size = chunk_size.max(1);
        // 空文件也有一个空分片，保证分片模式下至少发出一个请求
        let chunk_count = total_size.div_ceil(chunk_size).max(1);

        info!(
            "创建分片计划: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size, chunk_size, chunk_count
        );

        Self {
            total_size,
            chunk_size,
            chunk_count,
        }
    }

    /// 第 index 个分片
    pub fn chunk(&self, index: u64) -> Option<UploadChunk> {
        if index >= self.chunk_count {
            return None;
        }
        let start = index * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.total_size);
        Some(UploadChunk::new(index as usize, start..end))
    }

    /// 按索引顺序遍历分片
    pub fn chunks(&self) -> impl Iterator<Item = UploadChunk> + '_ {
        (0..self.chunk_count).filter_map(move |index| self.chunk(index))
    }

    /// 获取分片数量
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// 文件总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 分片大小
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

//! 基于 JSON Lines 的消息日志持久化
//!
//! 每个房间一个文件 `<dir>/<room>.jsonl`，每行一条消息记录，按序列号顺序追加。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use application::{JournalError, MessageJournal};
use async_trait::async_trait;
use domain::{Message, MessageRecord, RoomName};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const EXTENSION: &str = "jsonl";

pub struct JsonlJournal {
    directory: PathBuf,
    files: Mutex<OpenFiles>,
}

#[derive(Default)]
struct OpenFiles {
    handles: HashMap<RoomName, File>,
    /// 写入失败且无法回滚的房间，文件尾部状态未知，拒绝继续追加直到重启
    damaged: HashSet<RoomName>,
}

impl JsonlJournal {
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await.map_err(|err| {
            JournalError::io(format!("create {}: {err}", directory.display()))
        })?;
        Ok(Self {
            directory,
            files: Mutex::new(OpenFiles::default()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn room_path(&self, room: &RoomName) -> PathBuf {
        self.directory.join(format!("{room}.{EXTENSION}"))
    }

    async fn load_room(&self, room: RoomName, path: &Path) -> Result<Vec<Message>, JournalError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|err| JournalError::io(format!("read {}: {err}", path.display())))?;
        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();

        let mut messages = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = match serde_json::from_str::<MessageRecord>(line) {
                Ok(record) => record,
                // 崩溃时可能留下写了一半的最后一行，忽略它
                Err(err) if index + 1 == lines.len() && !complete => {
                    tracing::warn!(
                        room = %room,
                        line = index + 1,
                        error = %err,
                        "忽略不完整的日志尾行"
                    );
                    break;
                }
                Err(err) => {
                    return Err(JournalError::corrupted(format!(
                        "{}:{}: {err}",
                        path.display(),
                        index + 1
                    )))
                }
            };
            let message = Message::restore(room.clone(), record).map_err(|err| {
                JournalError::corrupted(format!("{}:{}: {err}", path.display(), index + 1))
            })?;
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageJournal for JsonlJournal {
    async fn load(&self) -> Result<Vec<Message>, JournalError> {
        let mut entries = fs::read_dir(&self.directory).await.map_err(|err| {
            JournalError::io(format!("read_dir {}: {err}", self.directory.display()))
        })?;

        let mut rooms = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| JournalError::io(err.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match RoomName::parse(stem) {
                Ok(room) => rooms.push((room, path)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "跳过无法识别的日志文件");
                }
            }
        }
        rooms.sort_by(|a, b| a.0.cmp(&b.0));

        let mut messages = Vec::new();
        for (room, path) in rooms {
            let loaded = self.load_room(room.clone(), &path).await?;
            tracing::debug!(room = %room, count = loaded.len(), "房间日志已加载");
            messages.extend(loaded);
        }
        Ok(messages)
    }

    async fn append(&self, message: &Message) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(&message.to_record())
            .map_err(|err| JournalError::io(format!("encode: {err}")))?;
        line.push('\n');

        let room = message.room();
        let mut files = self.files.lock().await;
        if files.damaged.contains(room) {
            return Err(JournalError::io(format!(
                "journal for room {room} is damaged, restart required"
            )));
        }
        if !files.handles.contains_key(room) {
            let path = self.room_path(room);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|err| JournalError::io(format!("open {}: {err}", path.display())))?;
            files.handles.insert(room.clone(), file);
        }
        let Some(file) = files.handles.get_mut(room) else {
            return Err(JournalError::io("journal file handle missing"));
        };

        let length = file
            .metadata()
            .await
            .map_err(|err| JournalError::io(format!("stat: {err}")))?
            .len();
        let Err(err) = write_line(file, line.as_bytes()).await else {
            return Ok(());
        };

        // 失败的写入可能留下半行，截断回写入前的长度，下次追加重新打开文件
        let rolled_back = truncate_to(file, length).await;
        files.handles.remove(room);
        if let Err(rollback) = rolled_back {
            tracing::error!(
                room = %room,
                sequence_id = message.sequence_id(),
                error = %rollback,
                "日志回滚失败，该房间停止持久化"
            );
            files.damaged.insert(room.clone());
        }
        Err(err)
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> Result<(), JournalError> {
    file.write_all(line)
        .await
        .map_err(|err| JournalError::io(format!("write: {err}")))?;
    // tokio 的写入在后台完成，flush 才能取得真实的写入结果
    file.flush()
        .await
        .map_err(|err| JournalError::io(format!("flush: {err}")))?;
    file.sync_data()
        .await
        .map_err(|err| JournalError::io(format!("sync: {err}")))
}

async fn truncate_to(file: &mut File, length: u64) -> Result<(), JournalError> {
    file.set_len(length)
        .await
        .map_err(|err| JournalError::io(format!("truncate: {err}")))?;
    file.sync_data()
        .await
        .map_err(|err| JournalError::io(format!("sync: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::{InMemoryMessageLog, MessageLog};
    use domain::{DisplayName, MessageDraft};
    use std::sync::Arc;

    fn draft(text: &str) -> MessageDraft {
        MessageDraft::text(DisplayName::parse("Alice").unwrap(), text).unwrap()
    }

    #[tokio::test]
    async fn appended_messages_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let room = RoomName::default();
        let side = RoomName::parse("side").unwrap();

        {
            let journal = Arc::new(JsonlJournal::open(dir.path()).await.unwrap());
            let log = InMemoryMessageLog::with_journal(journal).await.unwrap();
            log.append(&room, draft("one")).await.unwrap();
            log.append(&room, draft("two")).await.unwrap();
            let photo = MessageDraft::photo(DisplayName::anonymous(), "https://cdn/p.png").unwrap();
            log.append(&side, photo).await.unwrap();
        }

        let journal = Arc::new(JsonlJournal::open(dir.path()).await.unwrap());
        let log = InMemoryMessageLog::with_journal(journal).await.unwrap();

        let restored = log.read_from(&room, 0).await;
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].text(), Some("two"));
        assert_eq!(log.read_from(&side, 0).await[0].image_url(), Some("https://cdn/p.png"));

        let next = log.append(&room, draft("three")).await.unwrap();
        assert_eq!(next.sequence_id(), 3);
    }

    #[tokio::test]
    async fn torn_trailing_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("messages.jsonl"),
            "{\"text\":\"ok\",\"author\":\"Alice\",\"imageUrl\":null,\"sequenceId\":1}\n{\"text\":\"cut",
        )
        .unwrap();

        let journal = JsonlJournal::open(dir.path()).await.unwrap();
        let messages = journal.load().await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn gap_in_sequence_is_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("messages.jsonl"),
            concat!(
                "{\"text\":\"a\",\"author\":\"Alice\",\"imageUrl\":null,\"sequenceId\":1}\n",
                "{\"text\":\"c\",\"author\":\"Alice\",\"imageUrl\":null,\"sequenceId\":3}\n",
            ),
        )
        .unwrap();

        let journal = Arc::new(JsonlJournal::open(dir.path()).await.unwrap());
        let result = InMemoryMessageLog::with_journal(journal).await;
        assert!(matches!(result, Err(JournalError::Corrupted(_))));
    }

    #[tokio::test]
    async fn invalid_record_in_the_middle_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("messages.jsonl"),
            concat!(
                "{\"text\":null,\"author\":\"Alice\",\"imageUrl\":null,\"sequenceId\":1}\n",
                "{\"text\":\"b\",\"author\":\"Alice\",\"imageUrl\":null,\"sequenceId\":2}\n",
            ),
        )
        .unwrap();

        let journal = JsonlJournal::open(dir.path()).await.unwrap();
        assert!(matches!(journal.load().await, Err(JournalError::Corrupted(_))));
    }

    const FIRST_LINE: &str =
        "{\"text\":\"ok\",\"author\":\"Alice\",\"imageUrl\":null,\"sequenceId\":1}\n";

    #[tokio::test]
    async fn truncate_removes_partially_written_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(&path, FIRST_LINE).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        let length = file.metadata().await.unwrap().len();
        file.write_all(b"{\"text\":\"cut").await.unwrap();
        file.flush().await.unwrap();

        truncate_to(&mut file, length).await.unwrap();
        drop(file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), FIRST_LINE);

        // 回滚后同一序列号可以重新写入，重启时不会出现重复
        let journal = Arc::new(JsonlJournal::open(dir.path()).await.unwrap());
        let log = InMemoryMessageLog::with_journal(journal).await.unwrap();
        let next = log.append(&RoomName::default(), draft("again")).await.unwrap();
        assert_eq!(next.sequence_id(), 2);

        let journal = Arc::new(JsonlJournal::open(dir.path()).await.unwrap());
        let log = InMemoryMessageLog::with_journal(journal).await.unwrap();
        assert_eq!(log.latest_sequence(&RoomName::default()).await, 2);
    }

    #[tokio::test]
    async fn failed_write_that_cannot_be_rolled_back_stops_the_room() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(&path, FIRST_LINE).unwrap();

        let journal = JsonlJournal::open(dir.path()).await.unwrap();
        let room = RoomName::default();
        // 只读句柄：写入与截断都会失败
        let read_only = std::fs::File::open(&path).unwrap();
        journal
            .files
            .lock()
            .await
            .handles
            .insert(room.clone(), File::from_std(read_only));

        let message = draft("two").into_message(room.clone(), 2);
        assert!(matches!(journal.append(&message).await, Err(JournalError::Io(_))));
        assert!(journal.files.lock().await.damaged.contains(&room));

        // 即使重新打开也不再向可能损坏的文件追加
        let err = journal.append(&message).await.unwrap_err();
        assert!(err.to_string().contains("damaged"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), FIRST_LINE);

        // 其他房间不受影响
        let side = RoomName::parse("side").unwrap();
        journal
            .append(&draft("elsewhere").into_message(side, 1))
            .await
            .unwrap();
    }
}

//! TaskPayload trait - 型付き payload の定義
//!
//! `const TYPE` で task_type と Rust の型を対応付けます。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::Task;
use crate::error::SpindleResult;
use crate::typed::codec::PayloadCodec;

/// TaskPayload は task_type と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Welcome {
///     user_id: u64,
/// }
///
/// impl TaskPayload for Welcome {
///     const TYPE: &'static str = "user:welcome";
/// }
///
/// client.enqueue(Welcome { user_id: 42 }.into_task()?, EnqueueOptions::new()).await?;
/// ```
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    /// JSON-encode into an untyped `Task` tagged with `TYPE`.
    fn into_task(&self) -> SpindleResult<Task> {
        Ok(Task::new(Self::TYPE, PayloadCodec::encode(self)?))
    }
}

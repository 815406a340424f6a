use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::common::models::{Task, TaskState};
use crate::tasks::registry::TaskEvent;

/// 每个任务一条进度条，由注册表事件驱动
pub struct ProgressBoard {
    multi_pb: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// 不输出到终端
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{msg:40} [{elapsed_precise}] {wide_bar} {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        Self {
            multi_pb: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
            style,
        }
    }

    pub fn apply(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::Updated(task) => self.update(task),
            TaskEvent::Removed(task_id) => {
                if let Some(bar) = self.bars.remove(task_id) {
                    bar.finish_and_clear();
                    self.multi_pb.remove(&bar);
                }
            }
        }
    }

    /// 以注册表当前内容为准重建
    pub fn sync(&mut self, tasks: &[Task]) {
        let live: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        let gone: Vec<String> = self
            .bars
            .keys()
            .filter(|id| !live.contains(&id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            self.apply(&TaskEvent::Removed(id));
        }
        for task in tasks {
            self.update(task);
        }
    }

    fn update(&mut self, task: &Task) {
        let Self {
            multi_pb,
            bars,
            style,
        } = self;
        let bar = bars.entry(task.id.clone()).or_insert_with(|| {
            let bar = multi_pb.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar
        });
        bar.set_position(u64::from(task.progress_percent));
        bar.set_message(task.label.clone());
        if task.state.is_terminal() && task.state != TaskState::CancelRequested {
            bar.abandon();
        }
    }

    pub fn println(&self, message: impl AsRef<str>) {
        let _ = self.multi_pb.println(message.as_ref());
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::TaskKind;

    fn task(id: &str, percent: u8) -> Task {
        let mut task = Task::new(id, TaskKind::Downloading);
        task.label = format!("Preparing Vault ({}%)", percent);
        task.progress_percent = percent;
        task
    }

    #[test]
    fn tracks_one_bar_per_task() {
        let mut board = ProgressBoard::hidden();
        board.apply(&TaskEvent::Updated(task("a", 10)));
        board.apply(&TaskEvent::Updated(task("a", 20)));
        board.apply(&TaskEvent::Updated(task("b", 0)));
        assert_eq!(board.len(), 2);
        assert_eq!(board.bars["a"].position(), 20);

        board.apply(&TaskEvent::Removed("a".to_string()));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn sync_drops_bars_for_vanished_tasks() {
        let mut board = ProgressBoard::hidden();
        board.apply(&TaskEvent::Updated(task("a", 10)));
        board.apply(&TaskEvent::Updated(task("b", 10)));

        board.sync(&[task("b", 40)]);
        assert_eq!(board.len(), 1);
        assert_eq!(board.bars["b"].position(), 40);
    }
}

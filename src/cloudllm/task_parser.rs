//! Task parser: deterministic extraction of [`Task`] records from loosely
//! formatted markdown produced by ROUTA.
//!
//! Parsing never fails loudly — malformed or missing `@@@task` blocks simply yield an empty
//! list. The scanner walks the text line by line rather
//! than reaching for a regex crate, mirroring how [`crate::cloudllm::tool_call_extractor`]
//! brace-counts its way through a response instead of compiling a pattern for it.

use crate::cloudllm::domain::{Id, Task};

/// One canonical section a task sub-block may declare, along with every alias (including
/// Chinese aliases) that maps onto it. First match wins, in listed order.
struct SectionSpec {
    canonical: &'static str,
    aliases: &'static [&'static str],
    is_list: bool,
}

const SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        canonical: "Objective",
        aliases: &["Objective", "目标", "Goal", "目的"],
        is_list: false,
    },
    SectionSpec {
        canonical: "Scope",
        aliases: &["Scope", "范围", "作用域"],
        is_list: true,
    },
    SectionSpec {
        canonical: "Definition of Done",
        aliases: &[
            "Definition of Done",
            "完成标准",
            "验收标准",
            "Acceptance Criteria",
            "Done Criteria",
            "完成条件",
        ],
        is_list: true,
    },
    SectionSpec {
        canonical: "Verification",
        aliases: &["Verification", "验证", "Verify", "验证方法", "测试验证"],
        is_list: true,
    },
];

/// Find the canonical section whose alias list contains `header`, case-sensitive.
fn resolve_alias(header: &str) -> Option<&'static SectionSpec> {
    SECTIONS.iter().find(|spec| spec.aliases.contains(&header))
}

/// Extract every `@@@task ... @@@` block from `text` using a greedy-shortest, dot-matches-all
/// match: the first `@@@` line after `@@@task` closes the block. Trailing text after the last
/// `@@@` and any unterminated `@@@task` are ignored.
fn extract_task_blocks(text: &str) -> Vec<Vec<&str>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim() == "@@@task" {
            let start = i + 1;
            let mut end = None;
            for (offset, line) in lines[start..].iter().enumerate() {
                if line.trim() == "@@@" {
                    end = Some(start + offset);
                    break;
                }
            }
            if let Some(end) = end {
                blocks.push(lines[start..end].to_vec());
                i = end + 1;
                continue;
            } else {
                // Unterminated block: ignore and stop scanning further on this line.
                break;
            }
        }
        i += 1;
    }
    blocks
}

/// Returns `true` for lines that open/close a triple-backtick fenced code block.
fn is_fence_delimiter(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Split a block's lines into sub-blocks, one per level-1 header (`# `) that is not inside a
/// fenced code block. A block with zero or one such header yields a single sub-block.
fn split_sub_blocks<'a>(block: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut header_indices = Vec::new();
    let mut in_fence = false;
    for (idx, line) in block.iter().enumerate() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && line.starts_with("# ") {
            header_indices.push(idx);
        }
    }

    if header_indices.len() <= 1 {
        return vec![block.to_vec()];
    }

    let mut sub_blocks = Vec::new();
    for (pos, &start) in header_indices.iter().enumerate() {
        let end = header_indices.get(pos + 1).copied().unwrap_or(block.len());
        sub_blocks.push(block[start..end].to_vec());
    }
    sub_blocks
}

/// Locate the first `# ` line outside a fenced code block and return its trimmed title text.
fn find_title<'a>(sub_block: &[&'a str]) -> Option<&'a str> {
    let mut in_fence = false;
    for line in sub_block {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && line.starts_with("# ") {
            return Some(line[2..].trim());
        }
    }
    None
}

/// Extract every `## <alias>` section body from a sub-block, mapping aliases to their
/// canonical section name and splitting list-typed sections on `-` prefixed lines.
fn extract_sections(sub_block: &[&str]) -> Vec<(&'static str, Vec<String>, bool)> {
    let mut results = Vec::new();
    let mut idx = 0;
    while idx < sub_block.len() {
        let line = sub_block[idx];
        if let Some(header) = line.strip_prefix("## ") {
            let header = header.trim();
            if let Some(spec) = resolve_alias(header) {
                let mut body = Vec::new();
                idx += 1;
                while idx < sub_block.len() && !sub_block[idx].trim_start().starts_with("## ") {
                    body.push(sub_block[idx]);
                    idx += 1;
                }
                results.push((spec.canonical, body.iter().map(|s| s.to_string()).collect(), spec.is_list));
                continue;
            }
        }
        idx += 1;
    }
    results
}

fn list_items(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with('-'))
        .map(|l| l.trim_start_matches('-').trim().to_string())
        .collect()
}

fn plain_text(lines: &[String]) -> String {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse every `@@@task` block in `text` into ordered [`Task`] records, assigning each a fresh
/// id, `Pending` status, and the given `workspace_id`.
pub fn parse_tasks(text: &str, workspace_id: impl Into<Id> + Clone) -> Vec<Task> {
    let mut tasks = Vec::new();
    for block in extract_task_blocks(text) {
        for sub_block in split_sub_blocks(&block) {
            let title = find_title(&sub_block)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "Untitled Task".to_string());
            let mut task = Task::new(title, workspace_id.clone());
            for (canonical, body, is_list) in extract_sections(&sub_block) {
                match canonical {
                    "Objective" => task.objective = plain_text(&body),
                    "Scope" => task.scope = list_items(&body),
                    "Definition of Done" => task.acceptance_criteria = list_items(&body),
                    "Verification" => task.verification_commands = list_items(&body),
                    _ => {
                        if is_list {
                            // Unreached: all current canonical sections are matched above.
                        }
                    }
                }
            }
            tasks.push(task);
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_task_chinese_plan() {
        let text = r#"
@@@task
# 任务 1: 检查当前代码状态
## 目标
检查当前 git 状态和未提交的更改
## 范围
- 运行 git status
- 检查未暂存的更改
- 检查未提交的提交
## 验收标准
- 清楚了解当前状态
- 记录所有更改
- 无遗漏文件
## 验证
- git status
- git diff
- git log -1
@@@

@@@task
# 任务 2: 分析重置选项并获取用户确认
## 目标
分析可用的重置选项并征得用户同意
## 范围
- 列出重置策略
- 解释每种策略的影响
- 获取用户批准
## 验收标准
- 用户理解选项
- 用户批准了所选策略
- 记录了决定
## 验证
- 确认消息
- 决策记录
- 用户回复
@@@

@@@task
# 任务 3: 执行代码重置
## 目标
执行经批准的代码重置操作
## 范围
- 创建备份分支
- 执行重置命令
- 验证结果
## 验收标准
- 备份已创建
- 重置成功完成
- 工作树符合预期
## 验证
- git branch
- git status
- git log -1
@@@
"#;
        let tasks = parse_tasks(text, "ws-1");
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].title, "任务 1: 检查当前代码状态");
        assert_eq!(tasks[1].title, "任务 2: 分析重置选项并获取用户确认");
        assert_eq!(tasks[2].title, "任务 3: 执行代码重置");
        for task in &tasks {
            assert!(!task.objective.is_empty());
            assert!(task.scope.len() >= 3);
            assert!(task.acceptance_criteria.len() >= 3);
            assert!(task.verification_commands.len() >= 3);
        }
    }

    #[test]
    fn multi_title_single_block_yields_one_task_per_header() {
        let mut text = String::from("@@@task\n");
        for n in 1..=5 {
            text.push_str(&format!(
                "# 任务{}：做第{}件事\n## 目标\n完成第{}项工作\n## 范围\n- 步骤A\n- 步骤B\n",
                n, n, n
            ));
        }
        text.push_str("@@@\n");

        let tasks = parse_tasks(&text, "ws-1");
        assert_eq!(tasks.len(), 5);
        for (i, task) in tasks.iter().enumerate() {
            let n = i + 1;
            assert_eq!(task.title, format!("任务{}：做第{}件事", n, n));
        }
    }

    #[test]
    fn fenced_code_masks_headers() {
        let text = "@@@task\n\
```python\n\
# foo\n\
```\n\
# Real Title\n\
## Objective\n\
Do the thing\n\
@@@\n";
        let tasks = parse_tasks(text, "ws-1");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Real Title");
    }

    #[test]
    fn no_header_anywhere_yields_untitled() {
        let text = "@@@task\n\
```\n\
# foo\n\
```\n\
## Objective\n\
Something\n\
@@@\n";
        let tasks = parse_tasks(text, "ws-1");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Untitled Task");
    }

    #[test]
    fn no_at_pair_is_ignored() {
        let text = "# Just some markdown\nNo task blocks here.";
        let tasks = parse_tasks(text, "ws-1");
        assert!(tasks.is_empty());
    }

    #[test]
    fn trailing_text_after_last_block_is_ignored() {
        let text = "@@@task\n# Title\n## Objective\nDo it\n@@@\nSome trailing prose that is not a task.";
        let tasks = parse_tasks(text, "ws-1");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].objective, "Do it");
    }
}

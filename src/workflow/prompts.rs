//! Agent prompts, one per command, sharing a common context section.

use std::fmt::Write;

use super::context::WorkflowContext;
use super::github::Comment;
use super::models::CommandKind;

/// File the code review agent writes at the repository root.
pub const REVIEW_FILE: &str = "AIDW_REVIEW.md";

/// Render the prompt for a command.
pub fn render(kind: CommandKind, ctx: &WorkflowContext) -> String {
    let task = match kind {
        CommandKind::Plan => plan_task(ctx),
        CommandKind::Refine => refine_task(ctx),
        CommandKind::Build => build_task(ctx),
        // The build half of a oneshot run is rendered as `Build`.
        CommandKind::Oneshot => plan_task(ctx),
        CommandKind::Iterate => iterate_task(ctx),
        CommandKind::Codereview => codereview_task(ctx),
    };
    format!("{}\n{}", context_section(ctx), task)
}

fn write_comments(out: &mut String, comments: &[Comment]) {
    if comments.is_empty() {
        out.push_str("_No comments._\n");
        return;
    }
    for c in comments {
        let _ = writeln!(
            out,
            "**@{}** ({}):\n{}\n",
            c.author,
            c.created_at.format("%Y-%m-%d %H:%M"),
            c.body
        );
    }
}

fn context_section(ctx: &WorkflowContext) -> String {
    let mut out = String::new();
    let issue = &ctx.issue;

    let _ = writeln!(out, "# Context\n");
    let _ = writeln!(out, "## Issue #{}: {}\n", issue.number, issue.title);
    let _ = writeln!(
        out,
        "- Author: @{}\n- State: {}\n- URL: {}\n",
        issue.author, issue.state, issue.url
    );
    out.push_str(if issue.body.trim().is_empty() {
        "_No description provided._"
    } else {
        issue.body.trim()
    });
    out.push_str("\n\n### Issue comments\n\n");
    write_comments(&mut out, &issue.comments);

    if let Some(pr) = &ctx.pr {
        let _ = writeln!(out, "## Pull request #{}: {}\n", pr.number, pr.title);
        let _ = writeln!(
            out,
            "- Branch: `{}` (base `{}`)\n",
            pr.branch, pr.base_branch
        );
        if !pr.body.trim().is_empty() {
            let _ = writeln!(out, "{}\n", pr.body.trim());
        }
        out.push_str("### PR comments\n\n");
        write_comments(&mut out, &pr.comments);
    }

    let trigger = &ctx.trigger;
    let _ = writeln!(out, "## Request\n");
    let _ = writeln!(
        out,
        "@{} asked for `{}`.",
        trigger.author, trigger.command
    );
    if !trigger.instruction.trim().is_empty() {
        let _ = writeln!(out, "\nInstruction:\n\n> {}", trigger.instruction.trim());
    }
    out.push('\n');

    if let Some(git) = &ctx.git_state {
        let _ = writeln!(out, "## Repository state\n");
        let _ = writeln!(out, "Current branch: `{}`\n", git.branch);
        let _ = writeln!(out, "Recent commits:\n```\n{}\n```\n", git.log.trim_end());
        let _ = writeln!(
            out,
            "Last change:\n```\n{}\n```\n",
            git.diff_stat.trim_end()
        );
    }

    let _ = writeln!(out, "Plan file: `{}`", ctx.plan_path);
    out
}

fn plan_task(ctx: &WorkflowContext) -> String {
    format!(
        "# Task: write an implementation plan\n\n\
         Study the codebase and the issue above, then write a plan to `{plan}`.\n\n\
         The plan should cover:\n\
         - the problem and the intended outcome\n\
         - the files and modules that will change\n\
         - the implementation steps in order\n\
         - how the change will be tested\n\
         - open questions for the reviewer\n\n\
         Do not change any code besides the plan file. \
         When the plan is written, commit it with a message like `Add plan for #{issue}`.\n",
        plan = ctx.plan_path,
        issue = ctx.issue.number,
    )
}

fn refine_task(ctx: &WorkflowContext) -> String {
    format!(
        "# Task: refine the plan\n\n\
         The plan lives at `{plan}`. Read it, then revise it to address the PR feedback \
         and the instruction above. Keep what reviewers agreed with; change what they \
         questioned and say briefly why in the plan itself.\n\n\
         Only edit the plan file.\n",
        plan = ctx.plan_path,
    )
}

fn build_task(ctx: &WorkflowContext) -> String {
    format!(
        "# Task: implement the plan\n\n\
         Read the plan at `{plan}` and implement it in full.\n\n\
         - Follow the conventions already used in this repository.\n\
         - Add or update tests for the new behavior and make sure they pass.\n\
         - Keep the plan file; tick off items as they are done.\n\n\
         Leave the changes in the working tree; they will be committed for you.\n",
        plan = ctx.plan_path,
    )
}

fn iterate_task(_ctx: &WorkflowContext) -> String {
    "# Task: iterate on the implementation\n\n\
     Address the review feedback on this PR and the instruction above.\n\n\
     - Update the implementation where reviewers asked for changes.\n\
     - Update or add tests to cover what changed, and make sure the suite passes.\n\
     - Do not rewrite unrelated code.\n\n\
     Leave the changes in the working tree; they will be committed for you.\n"
        .to_string()
}

fn codereview_task(_ctx: &WorkflowContext) -> String {
    format!(
        "# Task: review this pull request\n\n\
         Review the changes on this branch against its base branch. \
         Do not modify, commit or push any code.\n\n\
         Write your review as Markdown to `{file}` at the repository root with these sections:\n\n\
         ## Summary\nWhat the change does, in a few sentences.\n\n\
         ## Issues\nBugs, regressions and risky changes, each with file and line.\n\n\
         ## Suggestions\nSmaller improvements worth making.\n\n\
         ## Verdict\nOne of: approve, approve with changes, request changes.\n",
        file = REVIEW_FILE,
    )
}

//! 各阶段的指令模板
//!
//! `{key}` 会在运行时替换为会话状态中同名键的值（见 stage::render_template）。

pub const CLASSIFIER_INSTRUCTION: &str = r#"You decide what kind of message the user just sent.

**Task**
Put the latest user message into exactly one of these categories:

1. github_details - the message points at a file on GitHub. It may be a GitHub URL such as https://github.com/ritwikmath/datastructure-practice/blob/main/algorithms/selectionsort.py (owner ritwikmath, repository datastructure-practice, branch main, file path algorithms/selectionsort.py), a raw.githubusercontent.com URL, or owner, repository, branch and file path given in any other form.
2. python_code - the message contains raw Python source code for which unit tests can be written. Other explanatory text may surround the code.
3. code_modification - the message asks for changes to code that was produced earlier in this conversation.
4. code_generation - the message describes code that should be written.
5. invalid_information - none of the above.

**Output**
For categories 1 to 4 answer with the category name only (github_details, python_code, code_modification or code_generation) and nothing else.
For invalid_information answer with a short message to the user explaining what input is accepted, for example:

Sorry, I couldn't understand your request. To proceed, please provide either:
1. **Raw Python code**, ideally inside triple backticks (e.g. ```python def my_func(): pass ```).
2. **GitHub file details**: repository owner, name, branch and file path (e.g. 'octocat/Spoon-Knife/main/README.md').
3. **A GitHub URL** to the file (e.g. 'https://github.com/ritwikmath/datastructure-practice/blob/main/algorithms/selectionsort.py').
4. **Instructions to generate code**: describe the Python code you want.
"#;

/// 定位阶段的前半段；工具参数 schema 追加在后面
pub const LOCATOR_INSTRUCTION: &str = r#"The user wants a file read from a public GitHub repository.

**Task**
Extract the repository owner, the repository name, the branch and the path of the file inside the repository from the latest user message. When the branch is not mentioned, use main.

**Output**
Answer with a single JSON object and nothing else. If any of the values cannot be determined, answer with an empty JSON object.
The object must match this schema:
"#;

pub const GENERATOR_INSTRUCTION: &str = r#"You are a code generating agent.

**Task**
Read the user's instructions carefully and write Python code that implements every logical component they ask for. The code must be syntactically correct. Use Python even if the user mentions another programming language.

**Output**
Output the entire code inside one fenced block (```python ... ```). Do not add any text before or after the code block.
"#;

pub const REFACTOR_INSTRUCTION: &str = r#"You are a code refactoring agent.

**Source Code:**
```python
{file_content}
```

**Task**
Study the code and make sure it is syntactically correct. Improve weak logic and inefficient parts without adding unnecessary behaviour. If the code misses edge cases, handle them. When the latest user message asks for specific changes, apply them.

**Output**
Output the entire refactored code inside one fenced block (```python ... ```). Do not add any text before or after the code block.
"#;

pub const DOCUMENTER_INSTRUCTION: &str = r#"You are a code documentation agent.

**Refactored Code:**
```python
{refactored_code}
```

**Task**
Add docstrings and comments so that anyone, including another language model that will write tests for it, can follow the code. Explain the logically complex parts in detail. Use a standard docstring format. Do not change behaviour.

**Output**
Output the entire documented code inside one fenced block (```python ... ```). Do not add any text before or after the code block.
"#;

pub const TESTER_INSTRUCTION: &str = r#"You are a unit test generator.

**Documented Code:**
```python
{documented_code}
```

**Task**
Write unit tests that are logically and syntactically correct. Cover most scenarios; if the code is small and simple, cover all of them.

**Output**
Merge the unit tests with the documented code and output the entire result inside one fenced block (```python ... ```). Do not add any text before or after the code block.
"#;

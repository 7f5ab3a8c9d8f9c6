/*!

This is the long-form manual for `survey_responses` and `surveysync`.

## Where answers live

A respondent's answers exist in three places, all describing the same
respondent (identified by email, compared without case):

* the [`ResponseStore`](crate::store::ResponseStore), held in memory and
  written to the durable cache under the key `surveyResponses` after every
  change,
* the progress snapshot of the respondent filling in the form, under the key
  `survey_progress`. There is at most one snapshot and it is only restored for
  the same email,
* the external record: the shared `SurveyResponse.json` file, owned by the
  `surveysync` updater.

When a form is opened, a snapshot for the same respondent wins over the
answers already stored. Saving a draft or submitting merges the form into the
store first and then sends the same updates to the external record through
the [`SyncQueue`](crate::queue::SyncQueue). A failure of the external record
never undoes the local save: it only adds a warning to the message.

## Question identifiers

The question list spells identifiers `s1_q1` (section 1, question 1). Stored
records use `s1q1`, and `s1q1_comment` for the comment on that question. The
[`ids`](crate::ids) module converts between the two.

## Answers

Ratings are integers from 1 to 5. A text answer is stored as the integer when
its trimmed text is one of `1` to `5`, and as text otherwise: `"10"` stays the
string `"10"`. An answer counts toward completion unless it is empty, blank or
the text `undefined`.

## The record file

A JSON array of objects:

```text
[
  {
    "Business_Email": "jane@example.com",
    "First_Name": "Jane",
    "Last_Name": "Doe",
    "Company": "Acme",
    "Job_Title": "CTO",
    "Industry": "Insurance",
    "Insurance_Type": "P&C",
    "Employee_Count": "250",
    "Annual_Revenue": "10M",
    "Ownership_Type": "Private",
    "Registration_Date": "2024-01-02",
    "Last_Modified_Date": "2024-03-04",
    "s1q1": 4,
    "s1q1_comment": "We are getting there"
  }
]
```

Other keys are kept as they are.

## The updater

```text
surveysync user@example.com s1q1 4 --records SurveyResponse.json
surveysync user@example.com s1q1 4 "This is my comment" --records SurveyResponse.json
surveysync user@example.com s1q1_comment "Just the comment" --records SurveyResponse.json
surveysync --batch updates.json --records SurveyResponse.json --out stdout
surveysync --status user@example.com --records SurveyResponse.json --questions QuestionList.json
```

A batch file maps emails to updates:

```text
{
  "email@example.com": {
    "s1q1": 4,
    "s1q1_comment": "This is a comment for question 1",
    "s1q2": 3
  },
  "another@example.com": {
    "s1q1": 5,
    "s2q1": 2
  }
}
```

Respondents are never created by the updater. The exit code is 0 when every
respondent of the batch was updated (or had nothing to update) and 1
otherwise. With `--out`, the report is written as JSON:

```text
{
  "success": true,
  "message": "Batch update complete: 1/2 users updated successfully",
  "details": {
    "another@example.com": { "status": "notFound" },
    "email@example.com": {
      "status": "updated",
      "updatedFields": { "s1q1": 4, "s1q1_comment": "This is a comment for question 1", "s1q2": 3 },
      "changed": 3,
      "skipped": []
    }
  },
  "successCount": 1,
  "totalCount": 2
}
```

`--dry-run` prints the changes to the record file instead of writing them.

## Configuration

Instead of flags, the files can be given in a JSON configuration file passed
with `--config`. Flags win over the file.

```text
{
  "responseFile": "SurveyResponse.json",
  "questionFile": "QuestionList.json",
  "outputFile": "report.json"
}
```

Relative paths are resolved against the directory of the configuration file.

 */
